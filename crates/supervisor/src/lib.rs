//! Child-process supervision: the parent-side `spawn`/`wait` API and the
//! child-side retry loop, ported from `zproc/process/process.py` and
//! `zproc/child.py`.
//!
//! Unlike the original, supervised targets are looked up by name from a
//! [`TargetRegistry`] instead of shipping a serialized closure across the
//! process boundary — the same `NamedOp` discipline the state engine uses
//! for atomic mutations.

mod child;
mod process;
mod registry;
mod retry;
mod signal;

pub use child::{run as run_child, ChildConfig};
pub use process::{spawn, SupervisedProcess};
pub use registry::{TargetFn, TargetOutcomeErr, TargetRegistry};
pub use retry::{run_retry_loop, ChildOutcome, RetryPolicy};
