//! Async TCP transport primitives: length-prefixed framing, a duplex RR
//! (request/reply) connection abstraction, and a WQ (work queue) proxy.
//!
//! There is no FAN primitive here: in this single-process server the State
//! Server and Watcher Service share one `ChangeLog` value directly (see
//! `engine::changelog`) instead of crossing a second wire protocol, per
//! `DESIGN.md`'s Open Question resolution.

mod framing;
mod handshake;
mod rr;
mod wq;

pub use framing::{read_frame, write_frame, FramingError, MAX_FRAME_LEN};
pub use handshake::{client_handshake, server_handshake};
pub use rr::{serve_rr, RrConnection};
pub use wq::TaskProxy;
