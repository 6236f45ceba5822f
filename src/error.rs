//! Error Taxonomy
//!
//! Every failure a caller can see, with its HTTP mapping. Categories are
//! disjoint so callers can choose the right remediation: fix the input,
//! authenticate, back off, retry later, or report a bug.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::llm::PlannerError;
use crate::query::{DispatchError, ExtractError, ValidationError};
use crate::security::RateLimitExceeded;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InputValidation(String),
    #[error("{0}")]
    ParseAmbiguity(String),
    #[error("{0}")]
    Authentication(String),
    #[error("Insufficient permissions for this operation.")]
    Authorization,
    #[error("Rate limit exceeded.")]
    RateLimited,
    #[error("The geometry engine rejected the request parameters.")]
    BackendRejection,
    #[error("LLM provider unavailable.")]
    ProviderUnavailable,
    #[error("{0}")]
    ProviderOutput(String),
    /// Full detail stays in the logs; the caller sees a generic failure.
    #[error("Internal server error.")]
    Unexpected,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InputValidation(_) | Self::BackendRejection => StatusCode::BAD_REQUEST,
            Self::ParseAmbiguity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProviderOutput(_) => StatusCode::BAD_GATEWAY,
            Self::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label recorded in the audit status column.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InputValidation(_) => "validation_error",
            Self::ParseAmbiguity(_) => "parse_error",
            Self::Authentication(_) => "auth_error",
            Self::Authorization => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::BackendRejection => "backend_rejected",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderOutput(_) => "provider_output_error",
            Self::Unexpected => "error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<ValidationError> for GatewayError {
    fn from(err: ValidationError) -> Self {
        Self::InputValidation(err.message)
    }
}

impl From<ExtractError> for GatewayError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Invalid(inner) => Self::InputValidation(inner.message),
            other => Self::ParseAmbiguity(other.to_string()),
        }
    }
}

impl From<RateLimitExceeded> for GatewayError {
    fn from(_: RateLimitExceeded) -> Self {
        Self::RateLimited
    }
}

impl From<DispatchError> for GatewayError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::TableNotPermitted { .. } => Self::InputValidation(err.to_string()),
            DispatchError::BackendRejected => Self::BackendRejection,
            DispatchError::BackendUnavailable | DispatchError::Internal => Self::Unexpected,
        }
    }
}

impl From<PlannerError> for GatewayError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::Input(message) => Self::InputValidation(message),
            PlannerError::Unavailable => Self::ProviderUnavailable,
            PlannerError::Output(message) => Self::ProviderOutput(message),
        }
    }
}
