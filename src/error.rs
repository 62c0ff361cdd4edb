//! Error taxonomy for the extraction engine.
//!
//! Classification drives retry behavior in the sync engine:
//! - `Config` / `Auth` abort the entire run
//! - `TransientHttp` is retried with bounded backoff, then aborts the stream
//! - `MalformedResponse` / `PrecisionLoss` abort the current stream only,
//!   leaving bookmarks persisted by earlier pages intact

/// Errors produced by the extraction engine.
#[derive(Debug)]
pub enum SyncError {
    /// Configuration satisfies neither credential variant, or is otherwise
    /// unusable. Detected before any network call.
    Config(String),
    /// The token endpoint is unreachable or rejected the credentials.
    Auth(String),
    /// Network failure, 5xx, or 429 from the query endpoint. Retryable.
    TransientHttp {
        status: Option<u16>,
        message: String,
    },
    /// Unparsable JSON, a missing result envelope, or an unexpected
    /// client-side rejection of a page request.
    MalformedResponse {
        stream: String,
        message: String,
    },
    /// A numeric field could not be represented losslessly.
    PrecisionLoss {
        stream: String,
        value: String,
    },
}

impl SyncError {
    /// Returns true if the sync engine should retry the request with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientHttp { .. })
    }

    /// Returns true if this error must abort the whole run, not just the
    /// current stream.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Auth(_))
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            SyncError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            SyncError::TransientHttp {
                status: Some(code),
                message,
            } => write!(f, "Transient HTTP error (status {}): {}", code, message),
            SyncError::TransientHttp {
                status: None,
                message,
            } => write!(f, "Transient HTTP error: {}", message),
            SyncError::MalformedResponse { stream, message } => {
                write!(f, "Malformed response for stream '{}': {}", stream, message)
            }
            SyncError::PrecisionLoss { stream, value } => write!(
                f,
                "Numeric value '{}' in stream '{}' cannot be represented losslessly",
                value, stream
            ),
        }
    }
}

impl std::error::Error for SyncError {}
