//! Domain logic for the shared-state coordination service: the State
//! Server actor, the watcher change log, the task result store, the
//! dict-mimic operation set and the `map_plus` task dispatcher.
//!
//! This crate has no networking in it by design — `services/server` wires
//! these actors to `transport`'s RR/WQ primitives, keeping domain logic
//! testable without a socket.

mod changelog;
mod dict_ops;
mod map_plus;
mod namespace;
mod path;
mod registry;
mod state_server;
mod task_store;

pub use changelog::{ChangeLog, ChangeLogEntry};
pub use dict_ops::apply as apply_dict_method;
pub use map_plus::map_plus;
pub use namespace::validate as validate_namespace;
pub use path::{get as get_path, set as set_path};
pub use registry::{NamedOp, OpRegistry};
pub use state_server::{StateCommand, StateHandle, StateServer};
pub use task_store::{ResultCommand, ResultHandle, ResultStore};
