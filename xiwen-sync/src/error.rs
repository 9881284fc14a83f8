//! Error types for the points tracker
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized for whatever UI sits on top.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: &'static str,
        to: &'static str,
    },

    /// A reachable backend rejected the operation
    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("Realtime channel error: {0}")]
    Realtime(String),

    #[error("{0}")]
    Generic(String),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
