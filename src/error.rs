//! Error types for the gateway.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::translate::anthropic_types::ErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed inbound payload. Never reaches the backend.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    /// Non-2xx reply from the backend, already in Anthropic error shape.
    #[error("Backend returned status {status}: {}", .error.error.message)]
    Backend { status: u16, error: ErrorResponse },

    #[error("Request rejected by operator")]
    ApprovalRejected,

    #[error("Rate limit exceeded, retry after {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status and Anthropic error envelope for this error.
    pub fn to_wire(&self) -> (StatusCode, ErrorResponse) {
        match self {
            Self::Validation { message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::invalid_request(message.clone()),
            ),
            Self::Backend { status, error } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                error.clone(),
            ),
            Self::ApprovalRejected => (
                StatusCode::FORBIDDEN,
                ErrorResponse::permission(self.to_string()),
            ),
            Self::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse::rate_limit(self.to_string()),
            ),
            Self::Translation { .. } | Self::Http(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::api_error(self.to_string()),
            ),
            Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_)
            | Self::Other(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::api_error(self.to_string()),
            ),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body) = self.to_wire();
        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
