use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RemoteException;
use crate::ident::ClientIdentity;
use crate::task_id::ChunkId;

/// A namespaced map of opaque, caller-serialized values. No schema is
/// enforced and key order is not semantically significant.
pub type StateMap = Map<String, Value>;

/// Bootstrap record returned by `get_server_meta`, listing every other
/// endpoint a client needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMeta {
    pub version: String,
    pub state_router: String,
    pub watcher_router: String,
    pub task_router: String,
    pub task_result_pull: String,
    pub task_proxy_in: String,
    pub task_proxy_out: String,
}

/// Emitted by the State Server after every request that could have mutated
/// state, and served from the watcher's per-namespace change log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub before: StateMap,
    pub after: StateMap,
    pub timestamp: f64,
    pub is_identical: bool,
}

/// The fixed dict-mimic operation set (Design Notes: "Rather than proxying
/// every mapping method, expose a fixed set").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DictMethod {
    Get { key: String },
    Set { key: String, value: Value },
    Update { entries: StateMap },
    Clear,
    Pop { key: String },
    Keys,
    Values,
    Items,
    /// Dotted-path deep get, e.g. `"a.b.2.c"`.
    GetPath { path: String },
    /// Dotted-path deep set, creating intermediate objects as needed.
    SetPath { path: String, value: Value },
    Merge { entries: StateMap },
}

/// Request frame on the State Server's RR endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RrRequest {
    Ping { identity: ClientIdentity, echo: Value },
    GetServerMeta { identity: ClientIdentity },
    GetState { identity: ClientIdentity, namespace: String },
    SetState { identity: ClientIdentity, namespace: String, state: StateMap },
    RunDictMethod { identity: ClientIdentity, namespace: String, method: DictMethod },
    RunFnAtomically {
        identity: ClientIdentity,
        namespace: String,
        op: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    Time { identity: ClientIdentity },
}

/// Reply frame on the State Server's RR endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RrReply {
    Ok { value: Value },
    Err { error: RemoteException },
}

impl RrReply {
    #[must_use]
    pub fn ok(value: Value) -> Self {
        RrReply::Ok { value }
    }

    #[must_use]
    pub fn err(error: RemoteException) -> Self {
        RrReply::Err { error }
    }

    pub fn into_result(self) -> Result<Value, RemoteException> {
        match self {
            RrReply::Ok { value } => Ok(value),
            RrReply::Err { error } => Err(error),
        }
    }
}

/// First frame on every connection, gating all further dispatch on a shared
/// signing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hello {
    pub token: String,
}

/// Reply to a [`Hello`] frame: accepted, or rejected before any command is
/// dispatched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum HelloAck {
    Accepted,
    Rejected(ErrorMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Logical fields of a watcher poll: `(identity, namespace, identical_okay,
/// only_after, live)`. `live` mirrors the Watcher's echo-suppression mode —
/// set whenever the caller last called `go_live()` — and is re-sent on
/// every poll since the State Server's `ChangeLog` is stateless between
/// requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatcherRequest {
    pub identity: ClientIdentity,
    pub namespace: String,
    pub identical_okay: bool,
    pub only_after: f64,
    pub live: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatcherReply {
    pub before: StateMap,
    pub after: StateMap,
    pub timestamp: f64,
    pub is_identical: bool,
}

/// Per-item iterables and shared args/kwargs for a dispatched task, matching
/// the `task_params` tuple from the wire framing section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskParams {
    pub map_iter: Option<Vec<Value>>,
    pub map_args: Option<Vec<Vec<Value>>>,
    pub args: Vec<Value>,
    pub map_kwargs: Option<Vec<Map<String, Value>>>,
    pub kwargs: Map<String, Value>,
    pub pass_state: bool,
    pub namespace: String,
}

/// A unit of work on the wire: `(chunk_id, registered_op_name, params)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    pub chunk_id: ChunkId,
    pub op: String,
    pub params: TaskParams,
}

/// Message on the WQ channel between the task proxy and a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WorkMessage {
    Item(WorkItem),
    /// Empty-frame sentinel; a worker receiving this exits cleanly.
    Shutdown,
}

/// The serialized outcome of executing one chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskResult {
    Items(Vec<Value>),
    Scalar(Value),
    Error(RemoteException),
}

/// Requests accepted by the Task Result Store's RR endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultRequest {
    Lookup { chunk_id: ChunkId },
    Deliver { chunk_id: ChunkId, result: TaskResult },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultReply {
    Result { result: TaskResult },
    Delivered,
}
