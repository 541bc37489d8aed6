use std::io::Write;

use chrono::Local;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::models::{ChatRequest, Message};

pub const DEFAULT_RELAY_URL: &str = "http://localhost:4000/chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  User,
  Bot,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::User => "user",
      Self::Bot => "bot",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  pub role: Role,
  pub content: String,
  pub time: String,
  /// Synthesized from a failed turn; never sent back to the relay.
  pub failed: bool,
}

/// Everything said in this session, oldest first.
#[derive(Debug, Default)]
pub struct Transcript {
  entries: Vec<Entry>,
}

impl Transcript {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> &[Entry] {
    &self.entries
  }

  pub fn push_user(&mut self, content: impl Into<String>) -> &Entry {
    self.push(Role::User, content.into(), false)
  }

  pub fn push_bot(&mut self, content: impl Into<String>) -> &Entry {
    self.push(Role::Bot, content.into(), false)
  }

  pub fn push_error(&mut self, description: impl std::fmt::Display) -> &Entry {
    self.push(Role::Bot, format!("Error: {description}"), true)
  }

  /// Messages to send with the next turn.
  pub fn history(&self) -> Vec<Message> {
    self
      .entries
      .iter()
      .filter(|e| !e.failed)
      .map(|e| Message::new(e.role.as_str(), e.content.clone()))
      .collect()
  }

  fn push(&mut self, role: Role, content: String, failed: bool) -> &Entry {
    self.entries.push(Entry {
      role,
      content,
      time: Local::now().format("%H:%M").to_string(),
      failed,
    });
    &self.entries[self.entries.len() - 1]
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
  Paragraph(String),
  ListItem(String),
}

/// Line-oriented markup: blank lines vanish, and a line whose trimmed form starts
/// with `*` is a list item made of that trimmed line minus its first two characters.
pub fn render_reply(text: &str) -> Vec<Line> {
  text
    .lines()
    .filter_map(|line| {
      let trimmed = line.trim();
      if trimmed.is_empty() {
        None
      } else if trimmed.starts_with('*') {
        Some(Line::ListItem(trimmed.chars().skip(2).collect()))
      } else {
        Some(Line::Paragraph(line.to_string()))
      }
    })
    .collect()
}

pub fn format_entry(entry: &Entry) -> String {
  let mut out = String::new();
  match entry.role {
    Role::User => out.push_str(&format!("[{}] you: {}\n", entry.time, entry.content)),
    Role::Bot => {
      out.push_str(&format!("[{}] bot:\n", entry.time));
      for line in render_reply(&entry.content) {
        match line {
          Line::Paragraph(text) => out.push_str(&format!("  {text}\n")),
          Line::ListItem(text) => out.push_str(&format!("    • {text}\n")),
        }
      }
    }
  }
  out
}

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("Server error: {status}{}", detail_suffix(.detail))]
  Status { status: u16, detail: Option<String> },

  #[error("{0}")]
  Network(#[from] reqwest::Error),

  #[error("relay response did not contain any content")]
  MissingContent,
}

fn detail_suffix(detail: &Option<String>) -> String {
  detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
}

#[derive(Deserialize)]
struct RelayReply {
  content: Option<String>,
  response: Option<String>,
  error: Option<String>,
}

pub struct RelayClient {
  http: reqwest::Client,
  url: String,
}

impl RelayClient {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      url: url.into(),
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub async fn send(&self, history: Vec<Message>) -> Result<String, ClientError> {
    let resp = self
      .http
      .post(&self.url)
      .json(&ChatRequest { messages: history })
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      let detail = resp.json::<RelayReply>().await.ok().and_then(|r| r.error);
      return Err(ClientError::Status {
        status: status.as_u16(),
        detail,
      });
    }

    let reply = resp.json::<RelayReply>().await?;
    reply.content.or(reply.response).ok_or(ClientError::MissingContent)
  }
}

/// One user turn: the user entry goes in right away, then exactly one bot entry.
pub async fn run_turn<'t>(client: &RelayClient, transcript: &'t mut Transcript, input: &str) -> &'t Entry {
  transcript.push_user(input);
  answer_turn(client, transcript).await
}

/// Sends the transcript and appends the bot reply, or an error entry on failure.
pub async fn answer_turn<'t>(client: &RelayClient, transcript: &'t mut Transcript) -> &'t Entry {
  match client.send(transcript.history()).await {
    Ok(content) => transcript.push_bot(content),
    Err(err) => {
      tracing::warn!("chat turn failed: {err}");
      transcript.push_error(err)
    }
  }
}

/// Reads lines until EOF or `/quit`, printing the transcript as it grows.
///
/// `interactive` enables the "thinking…" indicator and the escape codes that
/// erase it; leave it off when `out` is not a terminal.
pub async fn run_session<R, W>(
  client: &RelayClient,
  input: R,
  out: &mut W,
  interactive: bool,
) -> anyhow::Result<Transcript>
where
  R: AsyncBufRead + Unpin,
  W: Write,
{
  let mut transcript = Transcript::new();
  let mut lines = input.lines();
  writeln!(out, "Chatting with {} (/quit to leave)", client.url())?;

  loop {
    write!(out, "> ")?;
    out.flush()?;
    let Some(line) = lines.next_line().await? else {
      break;
    };
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    if line == "/quit" {
      break;
    }

    let user = transcript.push_user(line);
    write!(out, "{}", format_entry(user))?;
    if interactive {
      write!(out, "thinking…")?;
    }
    out.flush()?;

    let entry = answer_turn(client, &mut transcript).await;
    // Clear the indicator whatever the outcome.
    if interactive {
      write!(out, "\r\x1b[2K")?;
    }
    write!(out, "{}", format_entry(entry))?;
    out.flush()?;
  }
  Ok(transcript)
}
