//! Client-facing surface: the dict-mimic [`Client`], the predicate-driven
//! [`Watcher`], and the task-dispatching [`Swarm`] — the three things a
//! caller actually imports, grounded on `zproc/state/api.py` and
//! `zproc/task/swarm.py`.

mod state;
mod swarm;
mod watcher;

pub use state::Client;
pub use swarm::Swarm;
pub use watcher::Watcher;
