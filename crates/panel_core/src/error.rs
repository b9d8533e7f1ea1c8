use thiserror::Error;

/// Failure to exchange a request with the device. Always recoverable: the
/// caller keeps its last known good state and retries on the next cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device returned HTTP {status}")]
    Status { status: u16 },
    #[error("malformed device response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}
