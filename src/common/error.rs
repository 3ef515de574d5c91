//! Error types for leaderless

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Replica Errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Replica {replica} unavailable: {reason}")]
    ReplicaUnavailable { replica: String, reason: String },

    #[error("Replica {replica} failed: {reason}")]
    ReplicaFailed { replica: String, reason: String },

    #[error("Table does not exist")]
    NoTable,

    // === Quorum Errors ===
    #[error("Invalid quorum: {0}")]
    InvalidQuorum(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    // === Request Errors ===
    #[error("{0}")]
    Validation(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::ReplicaUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::Validation("name not present".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ReplicaUnavailable {
                replica: "r0".into(),
                reason: "refused".into()
            }
            .to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::NoTable.to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
