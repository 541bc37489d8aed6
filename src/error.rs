use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::ErrorBody;

pub const EMPTY_MESSAGES: &str = "Messages must be a non-empty array";
pub const INVALID_MESSAGE: &str = "Each message must have a valid role and content";
pub const INTERNAL_ERROR: &str = "Internal server error";

/// Everything a chat turn can fail with, as seen by the caller.
#[derive(Debug, Error)]
pub enum RelayError {
  #[error("{0}")]
  Validation(String),

  #[error("{0}")]
  Upstream(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl RelayError {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn upstream(msg: impl Into<String>) -> Self {
    Self::Upstream(msg.into())
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::Internal(msg.into())
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      Self::Validation(_) => StatusCode::BAD_REQUEST,
      Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Text placed in the `error` field. Internal details stay in the log.
  pub fn public_message(&self) -> String {
    match self {
      Self::Validation(msg) | Self::Upstream(msg) => msg.clone(),
      Self::Internal(_) => INTERNAL_ERROR.to_string(),
    }
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, Self::Validation(_))
  }

  pub fn is_upstream(&self) -> bool {
    matches!(self, Self::Upstream(_))
  }
}

impl IntoResponse for RelayError {
  fn into_response(self) -> Response {
    let body = Json(ErrorBody {
      error: self.public_message(),
    });
    (self.status_code(), body).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_maps_to_bad_request() {
    let err = RelayError::validation(EMPTY_MESSAGES);
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(err.public_message(), EMPTY_MESSAGES);
    assert!(err.is_validation());
  }

  #[test]
  fn upstream_maps_to_server_error_and_passes_message() {
    let err = RelayError::upstream("API key not valid");
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.public_message(), "API key not valid");
    assert!(err.is_upstream());
  }

  #[test]
  fn internal_hides_details() {
    let err = RelayError::internal("serializer exploded");
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.public_message(), INTERNAL_ERROR);
    assert!(err.to_string().contains("serializer exploded"));
  }
}
