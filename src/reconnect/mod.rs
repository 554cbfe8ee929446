//! Device reconnect policy.
//!
//! Governs re-acquisition of a lost capture device with a constant wait
//! between attempts and a hard ceiling on consecutive failures.

mod policy;

pub use policy::{ReconnectError, ReconnectPolicy, ReconnectState};
