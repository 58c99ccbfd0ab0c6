//! Stub Election
//!
//! Capacity-limited roles: at most `target` processes cluster-wide host a
//! role at once, each holding one slot key under its own lease.

pub mod slots;
pub mod stub;

pub use slots::StubSlotMap;
pub use stub::{ElectionState, StubElection, StubListener, StubRole};
