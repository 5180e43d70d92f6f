//! Error types for the satellite feed

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Satellite feed errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An optional input (element directory, marker, observer descriptor) is absent
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// An input unit could not be understood and was dropped
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Propagation or look-angle computation failed for a single satellite
    #[error("Propagation failed for '{name}': {message}")]
    Propagation { name: String, message: String },

    /// Facility dataset could not be fetched or processed
    #[error("Facility dataset error: {0}")]
    Facility(String),

    /// The push channel to a client failed
    #[error("Push channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a malformed input error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create a propagation error for one satellite
    pub fn propagation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Propagation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a facility dataset error
    pub fn facility(message: impl Into<String>) -> Self {
        Self::Facility(message.into())
    }

    /// Create a push channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            Error::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.clone()),
            Error::Malformed(msg) => (StatusCode::BAD_REQUEST, "malformed", msg.clone()),
            Error::Propagation { name, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "propagation_error",
                format!("{}: {}", name, message),
            ),
            Error::Facility(msg) => (StatusCode::BAD_GATEWAY, "facility_error", msg.clone()),
            Error::Channel(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "channel_error", msg.clone()),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Toml(err) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
