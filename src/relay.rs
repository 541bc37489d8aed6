use serde_json::Value;
use tracing::{info, warn};

use crate::error::{RelayError, EMPTY_MESSAGES, INVALID_MESSAGE};
use crate::models::Message;
use crate::provider::ChatProvider;

/// Pulls the message list out of a raw request body.
///
/// `{ "messages": [...] }` is the canonical shape. The older single-turn
/// `{ "message": "..." }` body is still accepted and becomes one `user` message.
pub fn parse_messages(body: &Value) -> Result<Vec<Message>, RelayError> {
  let Some(obj) = body.as_object() else {
    return Err(RelayError::validation(EMPTY_MESSAGES));
  };

  if let Some(messages) = obj.get("messages") {
    let entries = match messages.as_array() {
      Some(entries) if !entries.is_empty() => entries,
      _ => return Err(RelayError::validation(EMPTY_MESSAGES)),
    };
    return entries
      .iter()
      .enumerate()
      .map(|(idx, entry)| parse_entry(idx, entry))
      .collect();
  }

  if let Some(legacy) = obj.get("message") {
    warn!("deprecated single-turn body `{{\"message\": ...}}`; send `{{\"messages\": [...]}}` instead");
    return match legacy.as_str() {
      Some(text) if !text.is_empty() => Ok(vec![Message::user(text)]),
      _ => Err(RelayError::validation(format!("{INVALID_MESSAGE} (message 0)"))),
    };
  }

  Err(RelayError::validation(EMPTY_MESSAGES))
}

fn parse_entry(idx: usize, entry: &Value) -> Result<Message, RelayError> {
  let field = |name: &str| entry.get(name).and_then(Value::as_str).filter(|v| !v.is_empty());
  match (field("role"), field("content")) {
    (Some(role), Some(content)) => Ok(Message::new(role, content)),
    _ => Err(RelayError::validation(format!("{INVALID_MESSAGE} (message {idx})"))),
  }
}

/// Validates the body, forwards it to the provider and returns the answer text.
pub async fn relay_turn(provider: &dyn ChatProvider, body: &Value) -> Result<String, RelayError> {
  let messages = parse_messages(body)?;
  let completion = provider.generate(&messages).await?;
  if completion.is_fallback() {
    warn!(model = provider.model(), "provider returned no answer text, replying with fallback");
  } else {
    info!(model = provider.model(), answer = completion.text(), "provider answered");
  }
  Ok(completion.text().to_string())
}
