//! # Hive Types - Shared Data Model
//!
//! Types every other Hive crate agrees on: the envelope that carries a method
//! invocation across actors and processes, the closed argument variant, the
//! service types and delivery modes, and the member and stub slot records kept
//! in the coordination store.
//!
//! ## Layout
//!
//! - [`service`]: `ServiceType`, `SendMode`
//! - [`envelope`]: `EnvelopeHead`, `Envelope`, route shorthand
//! - [`arg`]: `Arg` and the `FromArgs`/`IntoArgs` conversions
//! - [`cluster`]: `ClusterMember`, `StubSlot`, member id hashing

pub mod arg;
pub mod cluster;
pub mod envelope;
pub mod service;

pub use arg::{Arg, ArgError, FromArg, FromArgs, IntoArg, IntoArgs};
pub use cluster::{member_id, slot_key, ClusterMember, StubSlot};
pub use envelope::{Envelope, EnvelopeHead};
pub use service::{SendMode, ServiceType};

use thiserror::Error;

/// Cluster member id (CRC32 of the member address).
pub type ClusterId = u32;

/// Client session id on a gate process.
pub type SocketId = u32;

/// Entity id used as routing key for virtual actors and pool shards.
pub type EntityId = i64;

/// Parse failures for the shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("Unknown service type: {name}")]
    UnknownServiceType { name: String },

    #[error("Invalid route '{route}': expected [service<-]Actor.Method")]
    InvalidRoute { route: String },
}
