//! API error type shared by HTTP handlers, WebSocket replies and core logic.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::audio::AudioError;
use crate::history::HistoryError;
use crate::openai::OpenAiError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
  pub code: String,
  pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: ErrorDetails,
}

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("Invalid request: {0}")]
  BadRequest(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("AI service unavailable: {0}")]
  AiUnavailable(String),

  #[error(transparent)]
  Upstream(#[from] OpenAiError),

  #[error(transparent)]
  Audio(#[from] AudioError),

  #[error(transparent)]
  History(#[from] HistoryError),
}

impl ApiError {
  pub fn status_and_code(&self) -> (StatusCode, &'static str) {
    match self {
      Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
      Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
      Self::AiUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "ai_unavailable"),
      Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
      Self::History(HistoryError::UnsupportedVersion(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
      Self::Audio(_) | Self::History(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error"),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code) = self.status_and_code();
    if status.is_server_error() {
      tracing::error!(target: "renshuu_backend", error = %self, %code, "request failed");
    }

    let body = Json(ErrorResponse {
      error: ErrorDetails { code: code.to_string(), message: self.to_string() },
    });
    (status, body).into_response()
  }
}
