use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Rejected,
    Internal,
}

/// Error body returned by the device endpoints for requests that never reach
/// the ignition logic (malformed JSON, unknown routes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Local input that is rejected before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("key position {0} is out of range (expected 0-3)")]
    InvalidKeyPosition(u8),
    #[error("unknown control action: {0}")]
    UnknownAction(String),
    #[error("unknown key state: {0} (expected off, on, glow or start)")]
    UnknownState(String),
}

impl From<ControlError> for ApiError {
    fn from(value: ControlError) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
