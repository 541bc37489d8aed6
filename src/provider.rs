use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::{
  GenerationConfig, Message, ProviderContent, ProviderPart, ProviderRequest, ProviderResponse, SystemInstruction,
  FALLBACK_ANSWER,
};

pub const UPSTREAM_UNAVAILABLE: &str = "Upstream provider request failed";
pub const GENERIC_PROVIDER_ERROR: &str = "Gemini API error";

/// Outcome of a successful provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
  Answer(String),
  /// The provider answered 2xx but the answer path was missing or empty.
  Fallback,
}

impl Completion {
  pub fn text(&self) -> &str {
    match self {
      Self::Answer(text) => text,
      Self::Fallback => FALLBACK_ANSWER,
    }
  }

  pub fn is_fallback(&self) -> bool {
    matches!(self, Self::Fallback)
  }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
  async fn generate(&self, messages: &[Message]) -> Result<Completion, RelayError>;

  fn model(&self) -> &str;
}

pub struct GeminiProvider {
  http: reqwest::Client,
  url: String,
  api_key: String,
  model: String,
  generation: GenerationConfig,
  system_prompt: Option<String>,
}

impl GeminiProvider {
  pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.upstream_timeout {
      builder = builder.timeout(timeout);
    }
    let http = builder
      .build()
      .map_err(|err| RelayError::internal(format!("failed to build HTTP client: {err}")))?;

    Ok(Self {
      http,
      url: config.generate_url(),
      api_key: config.api_key.clone(),
      model: config.model.clone(),
      generation: config.generation,
      system_prompt: config.system_prompt.clone(),
    })
  }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
  async fn generate(&self, messages: &[Message]) -> Result<Completion, RelayError> {
    let payload = build_request(messages, self.generation, self.system_prompt.as_deref());
    debug!(model = %self.model, turns = payload.contents.len(), "calling Gemini");

    let resp = self
      .http
      .post(&self.url)
      .query(&[("key", self.api_key.as_str())])
      .json(&payload)
      .send()
      .await
      .map_err(|err| {
        if err.is_builder() {
          RelayError::internal(format!("could not build Gemini request: {}", err.without_url()))
        } else {
          warn!(error = %err.without_url(), "Gemini request failed");
          RelayError::upstream(UPSTREAM_UNAVAILABLE)
        }
      })?;

    let status = resp.status();
    let text = resp.text().await.map_err(|err| {
      warn!(error = %err.without_url(), "failed to read Gemini response body");
      RelayError::upstream(UPSTREAM_UNAVAILABLE)
    })?;

    if !status.is_success() {
      let passthrough = serde_json::from_str::<ProviderResponse>(&text)
        .ok()
        .and_then(|body| body.error)
        .and_then(|err| err.message)
        .filter(|msg| !msg.trim().is_empty());
      warn!(status = status.as_u16(), "Gemini responded with an error status");
      return Err(RelayError::upstream(
        passthrough.unwrap_or_else(|| format!("Gemini API responded with status {}", status.as_u16())),
      ));
    }

    let body = serde_json::from_str::<ProviderResponse>(&text).map_err(|err| {
      warn!(error = %err, "Gemini response was not valid JSON");
      RelayError::upstream(UPSTREAM_UNAVAILABLE)
    })?;
    interpret(body)
  }

  fn model(&self) -> &str {
    &self.model
  }
}

/// Gemini only knows `user` and `model`.
pub fn provider_role(role: &str) -> String {
  match role {
    "bot" | "assistant" | "model" => "model".to_string(),
    other => other.to_string(),
  }
}

pub fn build_request(messages: &[Message], generation: GenerationConfig, system_prompt: Option<&str>) -> ProviderRequest {
  ProviderRequest {
    system_instruction: system_prompt.map(|text| SystemInstruction {
      parts: vec![ProviderPart { text: text.to_string() }],
    }),
    contents: messages
      .iter()
      .map(|msg| ProviderContent {
        role: provider_role(&msg.role),
        parts: vec![ProviderPart {
          text: msg.content.clone(),
        }],
      })
      .collect(),
    generation_config: generation,
  }
}

pub fn interpret(body: ProviderResponse) -> Result<Completion, RelayError> {
  if let Some(err) = body.error {
    let message = err
      .message
      .filter(|msg| !msg.trim().is_empty())
      .unwrap_or_else(|| GENERIC_PROVIDER_ERROR.to_string());
    return Err(RelayError::upstream(message));
  }
  Ok(match body.answer() {
    Some(text) => Completion::Answer(text.to_string()),
    None => Completion::Fallback,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::{Arc, Mutex};

  use axum::extract::{Path, Query, State};
  use axum::http::StatusCode;
  use axum::routing::post;
  use axum::{Json, Router};
  use serde_json::{json, Value};

  use crate::config::DEFAULT_SYSTEM_PROMPT;

  #[derive(Clone, Default)]
  struct Seen {
    calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
  }

  async fn spawn_fake_gemini(status: StatusCode, reply: Value) -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
      .route(
        "/v1beta/models/:call",
        post(
          move |State(seen): State<Seen>,
                Path(call): Path<String>,
                Query(query): Query<HashMap<String, String>>,
                Json(body): Json<Value>| {
            let reply = reply.clone();
            async move {
              seen
                .calls
                .lock()
                .expect("lock")
                .push((call, query.get("key").cloned(), body));
              (status, Json(reply))
            }
          },
        ),
      )
      .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
      let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1beta"), seen)
  }

  fn provider_for(base_url: &str) -> GeminiProvider {
    let mut config = RelayConfig::new("test-key");
    config.base_url = base_url.to_string();
    GeminiProvider::new(&config).expect("provider")
  }

  fn fever() -> Vec<Message> {
    vec![Message::user("What is a fever?")]
  }

  #[test]
  fn roles_map_to_gemini_vocabulary() {
    assert_eq!(provider_role("user"), "user");
    assert_eq!(provider_role("bot"), "model");
    assert_eq!(provider_role("assistant"), "model");
    assert_eq!(provider_role("model"), "model");
    assert_eq!(provider_role("system"), "system");
  }

  #[test]
  fn build_request_keeps_order_and_generation_config() {
    let messages = vec![
      Message::user("first"),
      Message::new("bot", "reply"),
      Message::user("second"),
    ];
    let generation = GenerationConfig {
      temperature: 0.3,
      max_output_tokens: 200,
    };
    let req = build_request(&messages, generation, None);
    let roles: Vec<&str> = req.contents.iter().map(|c| c.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "model", "user"]);
    assert_eq!(req.contents[2].parts, vec![ProviderPart { text: "second".to_string() }]);
    assert_eq!(req.generation_config, generation);
    assert!(req.system_instruction.is_none());
  }

  #[test]
  fn system_prompt_travels_outside_the_turns() {
    let generation = GenerationConfig {
      temperature: 0.3,
      max_output_tokens: 200,
    };
    let req = build_request(&fever(), generation, Some("Be brief."));
    assert_eq!(req.contents.len(), 1);
    let instruction = req.system_instruction.expect("instruction present");
    assert_eq!(instruction.parts, vec![ProviderPart { text: "Be brief.".to_string() }]);
  }

  #[test]
  fn interpret_uses_error_message_from_success_body() {
    let body: ProviderResponse =
      serde_json::from_value(json!({ "error": { "message": "quota exceeded" } })).expect("deserialize");
    let err = interpret(body).unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.public_message(), "quota exceeded");
  }

  #[test]
  fn interpret_prefers_error_payload() {
    let body: ProviderResponse = serde_json::from_value(json!({ "error": {} })).expect("deserialize");
    let err = interpret(body).unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.public_message(), GENERIC_PROVIDER_ERROR);
  }

  #[test]
  fn interpret_falls_back_without_answer() {
    let body: ProviderResponse = serde_json::from_value(json!({ "candidates": [] })).expect("deserialize");
    let completion = interpret(body).expect("fallback is not an error");
    assert!(completion.is_fallback());
    assert_eq!(completion.text(), FALLBACK_ANSWER);
  }

  #[tokio::test]
  async fn generate_posts_expected_payload() {
    let (base, seen) = spawn_fake_gemini(
      StatusCode::OK,
      json!({ "candidates": [{ "content": { "parts": [{ "text": "A fever is..." }] } }] }),
    )
    .await;

    let completion = provider_for(&base).generate(&fever()).await.expect("success");
    assert_eq!(completion, Completion::Answer("A fever is...".to_string()));

    let calls = seen.calls.lock().expect("lock");
    assert_eq!(calls.len(), 1);
    let (call, key, body) = &calls[0];
    assert_eq!(call, "gemini-1.5-flash:generateContent");
    assert_eq!(key.as_deref(), Some("test-key"));
    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "What is a fever?");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 200);
    let temperature = body["generationConfig"]["temperature"].as_f64().expect("number");
    assert!((temperature - 0.3).abs() < 1e-6);
    let instruction = body["systemInstruction"]["parts"][0]["text"].as_str().expect("system instruction");
    assert_eq!(instruction, DEFAULT_SYSTEM_PROMPT);
  }

  #[tokio::test]
  async fn cleared_system_prompt_is_not_sent() {
    let (base, seen) = spawn_fake_gemini(
      StatusCode::OK,
      json!({ "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }] }),
    )
    .await;
    let mut config = RelayConfig::new("test-key");
    config.base_url = base;
    config.system_prompt = None;

    GeminiProvider::new(&config).expect("provider").generate(&fever()).await.expect("success");
    let calls = seen.calls.lock().expect("lock");
    assert!(calls[0].2.get("systemInstruction").is_none());
  }

  #[tokio::test]
  async fn success_status_with_error_payload_is_upstream_error() {
    let (base, _) = spawn_fake_gemini(StatusCode::OK, json!({ "error": { "message": "quota exceeded" } })).await;

    let err = provider_for(&base).generate(&fever()).await.unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.public_message(), "quota exceeded");
  }

  #[tokio::test]
  async fn error_status_passes_provider_message_through() {
    let (base, _) = spawn_fake_gemini(
      StatusCode::FORBIDDEN,
      json!({ "error": { "code": 403, "message": "API key not valid.", "status": "PERMISSION_DENIED" } }),
    )
    .await;

    let err = provider_for(&base).generate(&fever()).await.unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.public_message(), "API key not valid.");
  }

  #[tokio::test]
  async fn error_status_without_payload_is_generic() {
    let (base, _) = spawn_fake_gemini(StatusCode::SERVICE_UNAVAILABLE, json!("overloaded")).await;

    let err = provider_for(&base).generate(&fever()).await.unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.public_message(), "Gemini API responded with status 503");
  }

  #[tokio::test]
  async fn missing_answer_path_falls_back() {
    let (base, _) = spawn_fake_gemini(StatusCode::OK, json!({ "candidates": [{ "finishReason": "SAFETY" }] })).await;

    let completion = provider_for(&base).generate(&fever()).await.expect("fallback");
    assert!(completion.is_fallback());
  }

  #[tokio::test]
  async fn unreachable_provider_is_upstream_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = provider_for(&format!("http://{addr}/v1beta"))
      .generate(&fever())
      .await
      .unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.public_message(), UPSTREAM_UNAVAILABLE);
  }
}
