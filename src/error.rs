use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::store::StoreError;

/// Errors surfaced by the engines. The HTTP adapter maps these to structured
/// responses; `Storage` aborts the transaction and surfaces as a 5xx.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field,
            message: message.into(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation => {
                EngineError::Conflict("concurrent write hit a unique constraint".to_string())
            }
            other => EngineError::Storage(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ValidationBody {
    pub message: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationBody {
    pub fn single(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self {
            message: "The given data was invalid.".to_string(),
            errors,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match self {
            EngineError::InvalidInput { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ValidationBody::single(field, &message)),
            )
                .into_response(),
            EngineError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorBody { message })).into_response()
            }
            EngineError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorBody { message })).into_response()
            }
            EngineError::Storage(message) => {
                error!(error = %message, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        message: "internal server error".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}
