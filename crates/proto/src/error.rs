use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known error codes carried on protocol error frames.
pub mod error_codes {
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const EMPTY_NAMESPACE: &str = "EMPTY_NAMESPACE";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const UNKNOWN_OP: &str = "UNKNOWN_OP";
    pub const DUPLICATE_RESULT: &str = "DUPLICATE_RESULT";
    pub const CHUNK_COUNT_INVALID: &str = "CHUNK_COUNT_INVALID";
}

/// A serialized exception raised by user code on the server or in a worker,
/// transported back across the RR connection and re-raised client-side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteException {
    pub code: String,
    pub message: String,
}

impl RemoteException {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteException { code: code.into(), message: message.into() }
    }
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteException {}

/// Client-side error taxonomy, matching `zproc.exceptions`.
#[derive(Debug, Error)]
pub enum ZprocError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("watcher stopped after reaching its count limit")]
    Stopped,

    #[error("remote exception: {0}")]
    Remote(#[from] RemoteException),

    #[error("process wait error: {message} (exitcode={exitcode:?})")]
    ProcessWait { message: String, exitcode: Option<i32> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ZprocError {
    #[must_use]
    pub fn protocol_error(err: &serde_json::Error) -> Self {
        ZprocError::Connection(format!("protocol error: {err}"))
    }
}
