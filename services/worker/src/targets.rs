use supervisor::{TargetOutcomeErr, TargetRegistry};

/// Built-in supervised-process targets, the `Process`-side counterpart of
/// [`crate::ops::builtin_registry`]. A real deployment registers its own
/// long-running entry points here; `noop` just exists so the re-exec path
/// has something to exercise end to end.
#[must_use]
pub fn builtin_registry() -> TargetRegistry {
    let mut registry = TargetRegistry::new();

    registry.register("noop", |args, _kwargs, _server_addr| Ok(args.clone()));

    registry.register("fail", |_args, _kwargs, _server_addr| {
        Err(TargetOutcomeErr::Failure { kind: "Fatal".into(), message: "fail target always fails".into() })
    });

    registry
}
