use std::collections::HashMap;
use std::sync::Arc;

use proto::{RemoteException, StateMap};
use serde_json::{Map, Value};

/// A server- or worker-side handler registered under a stable name, the
/// portable replacement for shipping a serialized closure across a process
/// boundary (spec.md §9, "Serialized callables across processes").
///
/// `state` is `Some` for atomic functions running against the live map and
/// for worker tasks submitted with `pass_state`; `None` otherwise.
pub type OpFn = dyn Fn(&[Value], &Map<String, Value>, Option<&mut StateMap>) -> Result<Value, RemoteException>
    + Send
    + Sync;

#[derive(Clone)]
pub struct NamedOp {
    pub name: String,
    handler: Arc<OpFn>,
}

impl NamedOp {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[Value], &Map<String, Value>, Option<&mut StateMap>) -> Result<Value, RemoteException>
            + Send
            + Sync
            + 'static,
    {
        NamedOp { name: name.into(), handler: Arc::new(handler) }
    }

    pub fn call(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
        state: Option<&mut StateMap>,
    ) -> Result<Value, RemoteException> {
        (self.handler)(args, kwargs, state)
    }
}

/// Registry of every [`NamedOp`] a server or worker process knows about.
#[derive(Clone, Default)]
pub struct OpRegistry {
    ops: HashMap<String, NamedOp>,
}

impl OpRegistry {
    #[must_use]
    pub fn new() -> Self {
        OpRegistry::default()
    }

    pub fn register(&mut self, op: NamedOp) {
        self.ops.insert(op.name.clone(), op);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NamedOp> {
        self.ops.get(name)
    }
}
