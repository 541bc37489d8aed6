use serde::{Deserialize, Serialize};

pub const FALLBACK_ANSWER: &str = "Sorry, I couldn’t generate a response.";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
  pub role: String,
  pub content: String,
}

impl Message {
  pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      role: role.into(),
      content: content.into(),
    }
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self::new("user", content)
  }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatRequest {
  pub messages: Vec<Message>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatResponse {
  pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
  pub error: String,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
  pub status: String,
  pub version: String,
  pub uptime_ms: u64,
  pub model: String,
}

// Gemini generateContent wire types.

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub system_instruction: Option<SystemInstruction>,
  pub contents: Vec<ProviderContent>,
  pub generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SystemInstruction {
  pub parts: Vec<ProviderPart>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProviderContent {
  pub role: String,
  pub parts: Vec<ProviderPart>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProviderPart {
  pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
  pub temperature: f32,
  pub max_output_tokens: u32,
}

#[derive(Deserialize, Default, Debug)]
pub struct ProviderResponse {
  #[serde(default)]
  pub candidates: Vec<Candidate>,
  pub error: Option<ProviderError>,
}

#[derive(Deserialize, Debug)]
pub struct Candidate {
  pub content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
pub struct CandidateContent {
  #[serde(default)]
  pub parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
pub struct CandidatePart {
  pub text: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ProviderError {
  pub message: Option<String>,
  pub code: Option<i64>,
  pub status: Option<String>,
}

impl ProviderResponse {
  /// `candidates[0].content.parts[0].text`, if present and non-empty.
  pub fn answer(&self) -> Option<&str> {
    self
      .candidates
      .first()?
      .content
      .as_ref()?
      .parts
      .first()?
      .text
      .as_deref()
      .filter(|text| !text.is_empty())
  }
}
