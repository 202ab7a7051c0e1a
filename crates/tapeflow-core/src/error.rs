//! Error types for TapeFlow
//!
//! This module defines the error types used throughout the TapeFlow system.
//! Errors carry a short context string; classification (caller error vs.
//! transient store failure vs. device failure) drives retry behaviour and
//! HTTP status mapping.

use std::io;
use thiserror::Error;

/// TapeFlow error types
#[derive(Debug, Error)]
pub enum TapeflowError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error, caller-visible
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict: lock held, duplicate name, or a concurrency guard fired
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Transient store error, retried with bounded backoff
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Compression codec failure on a specific archive
    #[error("Compression error: {0}")]
    Compression(String),

    /// Tape device failure
    #[error("Tape error: {0}")]
    Tape(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for TapeFlow operations
pub type Result<T> = std::result::Result<T, TapeflowError>;

impl TapeflowError {
    /// Whether the operation may be retried without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TapeflowError::TransientStore(_) | TapeflowError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for TapeflowError {
    fn from(err: serde_json::Error) -> Self {
        TapeflowError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TapeflowError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        TapeflowError::Timeout(err.to_string())
    }
}

impl From<sqlx::Error> for TapeflowError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => TapeflowError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                TapeflowError::TransientStore(err.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                TapeflowError::Conflict(err.to_string())
            }
            _ => TapeflowError::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TapeflowError::Config("test".to_string());
        assert_eq!(err.to_string(), "Configuration error: test");

        let err = TapeflowError::Validation("test".to_string());
        assert_eq!(err.to_string(), "Validation error: test");

        let err = TapeflowError::NotFound("test".to_string());
        assert_eq!(err.to_string(), "Resource not found: test");

        let err = TapeflowError::Conflict("test".to_string());
        assert_eq!(err.to_string(), "Conflict: test");

        let err = TapeflowError::Database("test".to_string());
        assert_eq!(err.to_string(), "Database error: test");

        let err = TapeflowError::TransientStore("test".to_string());
        assert_eq!(err.to_string(), "Transient store error: test");

        let err = TapeflowError::Compression("test".to_string());
        assert_eq!(err.to_string(), "Compression error: test");

        let err = TapeflowError::Tape("test".to_string());
        assert_eq!(err.to_string(), "Tape error: test");

        let err = TapeflowError::Timeout("test".to_string());
        assert_eq!(err.to_string(), "Operation timed out: test");

        let err = TapeflowError::Internal("test".to_string());
        assert_eq!(err.to_string(), "Internal error: test");
    }

    #[test]
    fn test_transient_classification() {
        assert!(TapeflowError::TransientStore("x".into()).is_transient());
        assert!(TapeflowError::Timeout("x".into()).is_transient());
        assert!(!TapeflowError::Validation("x".into()).is_transient());
        assert!(!TapeflowError::Database("x".into()).is_transient());
        assert!(!TapeflowError::Compression("x".into()).is_transient());
    }

    #[test]
    fn test_error_conversion_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let err: TapeflowError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_conversion_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: TapeflowError = json_err.into();
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_error_conversion_from_sqlx_row_not_found() {
        let err: TapeflowError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, TapeflowError::NotFound(_)));
    }
}
