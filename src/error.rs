use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::backend::BackendError;
use crate::importer::ImporterError;
use crate::loader::ImportError;
use crate::payments::PaymentError;
use crate::spreadsheet::SheetError;

/// Error returned by every API route, rendered as `{error, details?}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{error}")]
    Upstream {
        error: String,
        details: Option<Value>,
    },
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn upstream(error: impl Into<String>, details: impl ToString) -> Self {
        ApiError::Upstream {
            error: error.into(),
            details: Some(Value::String(details.to_string())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}: {:?}", status, self);
        }
        let body = match self {
            ApiError::Upstream { error, details } => ErrorBody { error, details },
            other => ErrorBody {
                error: other.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(_) => ApiError::NotFound(e.to_string()),
            BackendError::Forbidden(_) => ApiError::Forbidden(e.to_string()),
            BackendError::Conflict(_) | BackendError::RowLimitExceeded { .. } => {
                ApiError::Validation(e.to_string())
            }
            BackendError::Unavailable(_) => ApiError::upstream("Backend request failed", e),
        }
    }
}

impl From<SheetError> for ApiError {
    fn from(e: SheetError) -> Self {
        match e {
            SheetError::DuplicateColumn(_) => ApiError::Validation(e.to_string()),
            _ => ApiError::NotFound(e.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(e: ImportError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<ImporterError> for ApiError {
    fn from(e: ImporterError) -> Self {
        match e {
            ImporterError::Parse(e) => e.into(),
            ImporterError::Backend(e) => e.into(),
            ImporterError::BatchFailed { .. } => ApiError::upstream("Import failed", e),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::InvalidAmount
            | PaymentError::UnsupportedCurrency(_)
            | PaymentError::MissingUserId => ApiError::Validation(e.to_string()),
            PaymentError::SubscriptionNotFound => ApiError::NotFound(e.to_string()),
            PaymentError::MissingSecretKey => ApiError::Upstream {
                error: e.to_string(),
                details: None,
            },
            PaymentError::Gateway { details, .. } => ApiError::Upstream {
                error: "Failed to create payment intent".to_string(),
                details: Some(details),
            },
            PaymentError::InvalidPayload(_) => ApiError::upstream("Webhook error", e),
            PaymentError::Backend(_) => ApiError::upstream("Failed to update subscription", e),
        }
    }
}
