use engine::{NamedOp, OpRegistry};
use proto::{error_codes, RemoteException};
use serde_json::{json, Value};

/// Built-in task ops a freshly started worker can run without any extra
/// registration step, mirroring the handful of demo targets
/// `zproc/tests` dispatches against (`square`, `echo`, ...). A deployment
/// with real business logic registers its own ops here instead; this
/// registry is the extension point, not a fixed catalogue.
#[must_use]
pub fn builtin_registry() -> OpRegistry {
    let mut registry = OpRegistry::new();

    registry.register(NamedOp::new("echo", |args, kwargs, _state| {
        Ok(json!({ "args": args, "kwargs": kwargs }))
    }));

    registry.register(NamedOp::new("square", |args, _kwargs, _state| {
        let n = args.first().and_then(Value::as_f64).ok_or_else(|| {
            RemoteException::new(error_codes::UNKNOWN_OP, "square expects one numeric argument")
        })?;
        Ok(json!(n * n))
    }));

    registry.register(NamedOp::new("sum", |args, _kwargs, _state| {
        let total: f64 = args.iter().filter_map(Value::as_f64).sum();
        Ok(json!(total))
    }));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn square_op_squares_its_argument() {
        let registry = builtin_registry();
        let op = registry.get("square").expect("registered");
        let result = op.call(&[json!(4)], &Map::new(), None).unwrap();
        assert_eq!(result, json!(16.0));
    }

    #[test]
    fn unregistered_op_is_absent() {
        let registry = builtin_registry();
        assert!(registry.get("not_a_real_op").is_none());
    }
}
