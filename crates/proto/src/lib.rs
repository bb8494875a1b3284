//! Wire protocol types shared between the server, worker and client crates.

mod auth;
mod error;
mod ident;
mod message;
mod task_id;

pub use auth::{compute_token, verify_token};
pub use error::{error_codes, RemoteException, ZprocError};
pub use ident::{ClientIdentity, MIN_IDENTITY_LEN};
pub use message::{
    DictMethod, ErrorMessage, Hello, HelloAck, ResultReply, ResultRequest, RrReply, RrRequest,
    ServerMeta, StateMap, StateUpdate, TaskParams, TaskResult, WatcherReply, WatcherRequest,
    WorkItem, WorkMessage,
};
pub use task_id::{ChunkId, TaskId};

/// Current wire-format version, surfaced in `ServerMeta::version`.
pub const PROTOCOL_VERSION: &str = "1";

/// Current wall-clock time, in seconds, as the `f64` this crate uses for
/// `StateUpdate::timestamp` and watcher cursors.
///
/// # Panics
/// Panics if the system clock is set before the Unix epoch.
#[must_use]
pub fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs_f64()
}
