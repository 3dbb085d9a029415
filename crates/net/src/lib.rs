//! The I/O bridge: connection, server, and pending-connect records that
//! translate socket events into interpreter tasks.
//!
//! The bridge never calls the interpreter; once per main-loop iteration the
//! daemon pumps it for an ordered event list and turns each event into a
//! task, which preserves the single-threaded delivery-order guarantees.

pub mod bridge;
pub mod error;

pub use bridge::{Bridge, ConnId, IoEvent};
pub use error::{ConnectError, NetError, NetResult};
