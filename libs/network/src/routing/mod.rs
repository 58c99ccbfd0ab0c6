//! Routing Module
//!
//! Name layout, consistent hashing and the entity location cache used to turn
//! an envelope head into a concrete destination channel.

pub mod hash_ring;
pub mod location;
pub mod namespace;

pub use hash_ring::{HashRing, DEFAULT_REPLICAS};
pub use location::{Location, LocationCache};
pub use namespace::Namespace;
