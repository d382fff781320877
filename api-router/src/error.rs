use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{access::DenyReason, error::AppError};
use retrieval_pipeline::OrchestratorError;
use serde::Serialize;
use thiserror::Error;

/// API-facing error taxonomy (§7). Deliberately lossy toward the client:
/// internal detail from `AppError` is logged, never echoed back.
#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: &'static str },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Busy: retry after {retry_after_secs}s")]
    Busy { retry_after_secs: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provider error")]
    Provider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable tag carried in every error response.
    fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::Busy { .. } => "busy",
            Self::Conflict(_) => "conflict",
            Self::Provider(_) => "provider",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-friendly message. Passcode/access denials must not disclose
    /// whether a document exists beyond the slug the caller already knew, so
    /// `Unauthorized` never interpolates document state into its message.
    fn message(&self) -> String {
        match self {
            Self::NotFound(msg) | Self::BadRequest(msg) | Self::Conflict(msg) | Self::Timeout(msg) => msg.clone(),
            Self::Unauthorized { reason } => format!("access denied: {reason}"),
            Self::Busy { retry_after_secs } => format!("server busy, retry after {retry_after_secs}s"),
            Self::Provider(msg) => msg.clone(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

fn deny_reason_str(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::Inactive => "inactive",
        DenyReason::Passcode => "passcode",
        DenyReason::Unauthenticated => "registered",
        DenyReason::Forbidden => "forbidden",
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::Storage(_) => {
                tracing::error!(error = %err, "internal error");
                Self::Internal(err.to_string())
            }
            AppError::OpenAI(_) | AppError::Reqwest(_) => {
                tracing::error!(error = %err, "provider error");
                Self::Provider(err.to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::BadRequest(msg),
            AppError::Auth(_) => Self::Unauthorized { reason: "forbidden" },
            AppError::Busy { retry_after_secs } => Self::Busy { retry_after_secs },
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::Timeout(msg) => Self::Timeout(msg),
            AppError::LLMParsing(_) | AppError::Processing(_) => {
                tracing::error!(error = %err, "processing error");
                Self::Provider(err.to_string())
            }
            AppError::Join(_) | AppError::Io(_) | AppError::Anyhow(_) | AppError::InternalError(_) => {
                tracing::error!(error = %err, "internal error");
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::UnknownDocument(slug) => Self::NotFound(format!("unknown document: {slug}")),
            OrchestratorError::NoDocumentsRequested => Self::BadRequest("no documents requested".to_string()),
            OrchestratorError::TooManyDocuments { max } => {
                Self::BadRequest(format!("at most {max} documents may be queried at once"))
            }
            OrchestratorError::AccessDenied(reason) => Self::Unauthorized {
                reason: deny_reason_str(reason),
            },
            OrchestratorError::App(app_err) => app_err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after_secs = match &self {
            Self::Busy { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorResponse {
            status: "error",
            error_kind: self.error_kind(),
            message: self.message(),
            retry_after_secs,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    status: &'static str,
    error_kind: &'static str,
    message: String,
    #[serde(rename = "retry_after", skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}
