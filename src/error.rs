//! Error taxonomy for the store and the HTTP layer.
//!
//! Store lookups that miss return `Ok(None)`/`Ok(false)`; `StoreError` is kept
//! for faults. Handlers turn both into an `ApiError`, which renders as the
//! `{"error": {"<Label>": "<message>"}}` envelope.
use crate::router::Response;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a cafe named `{0}` already exists")]
    DuplicateName(String),
    #[error("there are no cafes in the database")]
    EmptyCollection,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::Forbidden(_) => 403,
            ApiError::Validation(_) => 400,
            ApiError::Conflict(_) => 409,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::UnsupportedMediaType(_) => 415,
            ApiError::Internal(_) => 500,
        }
    }

    /// Key used inside the `error` envelope.
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "Not Found",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::Validation(_) => "Bad Request",
            ApiError::Conflict(_) => "Conflict",
            ApiError::MethodNotAllowed(_) => "Method Not Allowed",
            ApiError::UnsupportedMediaType(_) => "Unsupported Media Type",
            ApiError::Internal(_) => "Internal Server Error",
        }
    }

    pub fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "error": { (self.label()): self.to_string() } });
        Response::json(body, status, HashMap::new())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => {
                ApiError::Conflict(format!("Sorry, a cafe named {name} already exists."))
            }
            StoreError::EmptyCollection => {
                ApiError::NotFound("Sorry, there are no cafes in the database.".to_string())
            }
            StoreError::Database(e) => {
                log::error!("cafe store error: {e}");
                ApiError::Internal("Sorry, something went wrong on our side.".to_string())
            }
        }
    }
}
