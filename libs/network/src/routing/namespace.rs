//! Store keys and transport channel names
//!
//! Everything a cluster shares lives under one namespace root:
//!
//! ```text
//! {ns}/{service}/{ip:port}     member record (JSON), service lease
//! {ns}/location/{entity}       entity location (JSON), service lease
//! {ns}/stub/{role}/{index}     stub slot (JSON), slot lease
//! {ns}/uuid/{worker}           worker-id claim, worker lease
//!
//! {ns}/{service}/{cluster}       point channel
//! {ns}/{service}                 topic / broadcast channel
//! {ns}/{service}/call/{cluster}  call channel
//! ```

use hive_types::{slot_key, ClusterId, ClusterMember, EntityId, ServiceType};

const LOCATION_DIR: &str = "location";
const STUB_DIR: &str = "stub";
const WORKER_DIR: &str = "uuid";
const CALL_DIR: &str = "call";

/// Namespace root shared by keys and channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    pub fn new(root: impl Into<String>) -> Self {
        let root: String = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn point_channel(&self, service: ServiceType, cluster_id: ClusterId) -> String {
        format!("{}/{}/{}", self.root, service, cluster_id)
    }

    pub fn topic_channel(&self, service: ServiceType) -> String {
        format!("{}/{}", self.root, service)
    }

    pub fn call_channel(&self, service: ServiceType, cluster_id: ClusterId) -> String {
        format!("{}/{}/{}/{}", self.root, service, CALL_DIR, cluster_id)
    }

    /// Watch scope for member records of every service type.
    pub fn members_prefix(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn member_key(&self, member: &ClusterMember) -> String {
        format!("{}/{}/{}", self.root, member.service, member.address())
    }

    /// Service type and address of a member key. Keys of other directories
    /// under the namespace yield `None`.
    pub fn parse_member_key(&self, key: &str) -> Option<(ServiceType, String)> {
        let rest = self.strip_root(key)?;
        let (service, address) = rest.split_once('/')?;
        if address.is_empty() || address.contains('/') {
            return None;
        }
        let service = service.parse().ok()?;
        Some((service, address.to_string()))
    }

    pub fn location_prefix(&self) -> String {
        format!("{}/{}/", self.root, LOCATION_DIR)
    }

    pub fn location_key(&self, id: EntityId) -> String {
        format!("{}{}", self.location_prefix(), id)
    }

    pub fn parse_location_key(&self, key: &str) -> Option<EntityId> {
        key.strip_prefix(&self.location_prefix())?.parse().ok()
    }

    pub fn stub_prefix(&self) -> String {
        format!("{}/{}/", self.root, STUB_DIR)
    }

    pub fn stub_key(&self, role: &str, index: i64) -> String {
        format!("{}{}", self.stub_prefix(), slot_key(role, index))
    }

    /// Role and slot index of a stub key.
    pub fn parse_stub_key(&self, key: &str) -> Option<(String, i64)> {
        let rest = key.strip_prefix(&self.stub_prefix())?;
        let (role, index) = rest.rsplit_once('/')?;
        if role.is_empty() {
            return None;
        }
        Some((role.to_string(), index.parse().ok()?))
    }

    pub fn worker_id_key(&self, worker_id: i64) -> String {
        format!("{}/{}/{}", self.root, WORKER_DIR, worker_id)
    }

    fn strip_root<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.root)?.strip_prefix('/')
    }
}
