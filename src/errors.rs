//! Error taxonomy and the single typed-error → HTTP mapping point.
//!
//! Every response body is the uniform envelope `{error, message?}` with a
//! stable code string; `message` detail is suppressed in production mode.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::OnceCell;
use serde_json::json;
use thiserror::Error;

use crate::llm::catalog::CatalogError;
use crate::llm::pool::KeyStats;
use crate::llm::LlmError;
use crate::store::StoreError;
use crate::workflow::tts::TtsError;
use crate::workflow::WorkflowError;

/// Set once at startup from NODE_ENV; tests leave it unset (full detail).
static PRODUCTION: OnceCell<bool> = OnceCell::new();

pub fn set_production_mode(production: bool) {
    let _ = PRODUCTION.set(production);
}

fn detail_suppressed() -> bool {
    *PRODUCTION.get().unwrap_or(&false)
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Input(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        pool_stats: Option<Vec<KeyStats>>,
    },

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn input(message: impl Into<String>) -> Self {
        AppError::Input(message.into())
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Input(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Upstream(_) => "upstream_failure",
            AppError::Network(_) => "network_error",
            AppError::Timeout(_) => "timeout",
            AppError::Store(e) => match e {
                StoreError::NotFound(_) => "not_found",
                _ => "store_error",
            },
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Input(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::NoAvailableKey => {
                AppError::Unauthorized("no API key available; supply one or wait for cooldowns".into())
            }
            LlmError::InvalidKey => AppError::Unauthorized("invalid API key".into()),
            LlmError::RateLimited => AppError::RateLimited {
                message: "provider rate limit hit; retry shortly".into(),
                pool_stats: None,
            },
            LlmError::Network(msg) => AppError::Network(msg),
            LlmError::Provider { status, message } => {
                AppError::Upstream(format!("provider returned {status}: {message}"))
            }
            LlmError::Parse(msg) => AppError::Upstream(msg),
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Precondition(msg) => AppError::Input(msg),
            WorkflowError::Store(e) => AppError::Store(e),
            WorkflowError::Llm(e) => e.into(),
            WorkflowError::Io(e) => AppError::Upstream(format!("bundle io error: {e}")),
        }
    }
}

impl From<TtsError> for AppError {
    fn from(e: TtsError) -> Self {
        match e {
            TtsError::Timeout(_) => AppError::Timeout(e.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Llm(e) => e.into(),
            CatalogError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{self}");
        }

        let mut body = json!({ "error": self.code() });
        if !detail_suppressed() {
            body["message"] = json!(self.to_string());
        }
        if let AppError::RateLimited {
            pool_stats: Some(stats),
            ..
        } = &self
        {
            body["pool"] = json!(stats);
        }

        let mut response = (status, Json(body)).into_response();
        if matches!(self, AppError::RateLimited { .. }) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("60"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::input("x").code(), "invalid_input");
        assert_eq!(AppError::NotFound("workflow".into()).code(), "not_found");
        assert_eq!(
            AppError::Store(StoreError::NotFound("w".into())).code(),
            "not_found"
        );
        assert_eq!(
            AppError::Store(StoreError::Conflict("c".into())).code(),
            "store_error"
        );
    }

    #[test]
    fn llm_errors_map_to_expected_statuses() {
        assert_eq!(
            AppError::from(LlmError::RateLimited).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::from(LlmError::InvalidKey).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(LlmError::Network("refused".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(LlmError::Provider {
                status: 500,
                message: "boom".into()
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn workflow_precondition_is_a_400() {
        let err: AppError = WorkflowError::Precondition("script must not be empty".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
