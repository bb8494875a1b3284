use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Raised by a supervised target instead of returning a value.
///
/// `ProcessExit` is never matched against a retry policy — it always ends
/// the child, with `code` becoming the OS exit status. `Failure` carries a
/// string `kind` (an exception name, or a signal name like `"SIGTERM"` when
/// raised by [`crate::retry::call_with_signal_interrupt`]) that is checked
/// against `RetryPolicy::retry_for`.
#[derive(Debug, Clone)]
pub enum TargetOutcomeErr {
    ProcessExit(i32),
    Failure { kind: String, message: String },
}

/// A registered supervised-process entry point: `(args, kwargs, server_addr)
/// -> result`. `server_addr` is `Some` only when the process was spawned
/// with `pass_context` set, in which case it is the coordination server's
/// address and it is up to the target to dial its own client with it.
pub type TargetFn =
    dyn Fn(&Value, &Value, Option<&str>) -> Result<Value, TargetOutcomeErr> + Send + Sync;

/// Maps a target name carried on the wire to the function that runs it,
/// mirroring [`crate::registry`](../engine/index.html)'s `OpRegistry` but for
/// whole supervised processes instead of atomic state mutations.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, Arc<TargetFn>>,
}

impl TargetRegistry {
    #[must_use]
    pub fn new() -> Self {
        TargetRegistry::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &Value, Option<&str>) -> Result<Value, TargetOutcomeErr> + Send + Sync + 'static,
    {
        self.targets.insert(name.into(), Arc::new(handler));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<TargetFn>> {
        self.targets.get(name).cloned()
    }
}
