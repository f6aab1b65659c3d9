use serde::Serialize;
use thiserror::Error;

/// Text sent to a client whose request could not be parsed.
pub const MALFORMED_REQUEST_MESSAGE: &str = "An error occurred";
/// Text sent to a client when the backend link is not connected.
pub const BACKEND_UNAVAILABLE_MESSAGE: &str = "Python service not available";
/// Text sent to a client that names an unknown action.
pub const INVALID_ACTION_MESSAGE: &str = "Invalid action";

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Backend service not available")]
    BackendUnavailable,

    #[error("Backend connection lost: {0}")]
    BackendConnectionLost(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Error reply sent to a single client: `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl BrokerError {
    pub fn to_error_code(&self) -> &'static str {
        match self {
            BrokerError::MalformedRequest(_) => "MALFORMED_REQUEST",
            BrokerError::Validation(_) => "VALIDATION_ERROR",
            BrokerError::InvalidAction(_) => "INVALID_ACTION",
            BrokerError::BackendUnavailable => "BACKEND_UNAVAILABLE",
            BrokerError::BackendConnectionLost(_) => "BACKEND_CONNECTION_LOST",
            BrokerError::Config(_) => "INVALID_CONFIG",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Text a client sees for this error. Internal failures share the
    /// generic malformed-request text.
    pub fn client_message(&self) -> String {
        match self {
            BrokerError::Validation(message) => message.clone(),
            BrokerError::InvalidAction(_) => INVALID_ACTION_MESSAGE.to_string(),
            BrokerError::BackendUnavailable | BrokerError::BackendConnectionLost(_) => {
                BACKEND_UNAVAILABLE_MESSAGE.to_string()
            },
            _ => MALFORMED_REQUEST_MESSAGE.to_string(),
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.client_message(),
        }
    }

    /// Serialized `{"error": ...}` reply for the originating client.
    pub fn to_reply_json(&self) -> String {
        serde_json::json!(self.to_error_response()).to_string()
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
