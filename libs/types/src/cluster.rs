//! Cluster member and stub slot records
//!
//! Both are stored as JSON values in the coordination store, so they derive
//! serde and keep their field names stable.

use serde::{Deserialize, Serialize};

use crate::service::ServiceType;
use crate::{ClusterId, SocketId};

/// Derived member id: CRC32 (IEEE) of the `ip:port` address.
pub fn member_id(address: &str) -> ClusterId {
    crc32fast::hash(address.as_bytes())
}

/// One process registered in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    pub service: ServiceType,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub socket_id: SocketId,
}

impl ClusterMember {
    pub fn new(service: ServiceType, ip: impl Into<String>, port: u16) -> Self {
        Self {
            service,
            ip: ip.into(),
            port,
            socket_id: 0,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn id(&self) -> ClusterId {
        member_id(&self.address())
    }
}

/// A held stub slot. Exists only while the holder's lease lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubSlot {
    pub role: String,
    pub index: i64,
    pub cluster_id: ClusterId,
    pub lease_id: i64,
}

impl StubSlot {
    /// Key relative to the stub directory.
    pub fn key(&self) -> String {
        slot_key(&self.role, self.index)
    }
}

pub fn slot_key(role: &str, index: i64) -> String {
    format!("{}/{}", role, index)
}
