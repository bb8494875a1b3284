use engine::{NamedOp, OpRegistry};
use proto::{error_codes, RemoteException};
use serde_json::{json, Value};

/// Built-in atomic ops a freshly started server accepts under
/// `run_fn_atomically`, grounded on `zproc/tests/test_atomic.py`'s
/// increment-style fixtures. A deployment with its own business logic
/// registers additional ops here before calling [`StateServer::spawn`].
#[must_use]
pub fn builtin_registry() -> OpRegistry {
    let mut registry = OpRegistry::new();

    registry.register(NamedOp::new("increment", |args, kwargs, state| {
        let map = state.expect("atomic op always runs against the live map");
        let key = args
            .first()
            .and_then(Value::as_str)
            .or_else(|| kwargs.get("key").and_then(Value::as_str))
            .ok_or_else(|| RemoteException::new(error_codes::UNKNOWN_OP, "increment needs a key argument"))?;
        let step = kwargs.get("step").and_then(Value::as_i64).unwrap_or(1);
        let current = map.get(key).and_then(Value::as_i64).unwrap_or(0);
        let next = current + step;
        map.insert(key.to_owned(), json!(next));
        Ok(json!(next))
    }));

    registry
}
