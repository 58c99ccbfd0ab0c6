//! Service self-registration
//!
//! Writes this node's member record under a lease and keeps the lease alive,
//! renewing every ttl/3. A failed renewal grants a fresh lease and re-puts
//! the record, so a node that was briefly cut off from the store reappears.
//! Records attached to the registration (entity locations) are re-put under
//! the fresh lease along with it.

use hive_types::ClusterMember;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::LeaseHandle;
use crate::routing::Namespace;
use crate::shutdown::{shutdown_requested, ShutdownSignal};
use crate::store::{CoordinationStore, LeaseId};
use crate::{ClusterError, Result};

/// Extra records that live and die with the service lease
#[derive(Debug, Clone, Default)]
pub struct AttachedRecords(Arc<Mutex<BTreeMap<String, Vec<u8>>>>);

impl AttachedRecords {
    pub fn attach(&self, key: impl Into<String>, value: Vec<u8>) {
        self.0.lock().insert(key.into(), value);
    }

    pub fn detach(&self, key: &str) -> bool {
        self.0.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        self.0
            .lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

pub struct ServiceRegistration {
    store: Arc<dyn CoordinationStore>,
    key: String,
    record: Vec<u8>,
    ttl: Duration,
    lease: LeaseHandle,
    attached: AttachedRecords,
}

impl ServiceRegistration {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        namespace: &Namespace,
        member: &ClusterMember,
        ttl: Duration,
    ) -> Result<Self> {
        let record = serde_json::to_vec(member).map_err(|e| {
            ClusterError::configuration(format!("member record: {e}"), Some("node"))
        })?;
        Ok(Self {
            store,
            key: namespace.member_key(member),
            record,
            ttl,
            lease: LeaseHandle::default(),
            attached: AttachedRecords::default(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lease the member record is attached to; entity locations share it.
    pub fn lease_handle(&self) -> LeaseHandle {
        self.lease.clone()
    }

    pub fn attached(&self) -> AttachedRecords {
        self.attached.clone()
    }

    /// Grant a lease and write the member record and every attached record
    /// under it.
    pub async fn register(&self) -> Result<LeaseId> {
        let lease = self.store.grant_lease(self.ttl).await?;
        self.store
            .put(&self.key, self.record.clone(), Some(lease))
            .await?;
        self.lease.set(Some(lease));

        let attached = self.attached.snapshot();
        for (key, value) in &attached {
            self.store.put(key, value.clone(), Some(lease)).await?;
        }
        info!(key = %self.key, lease, attached = attached.len(), "Service registered");
        Ok(lease)
    }

    /// Renew the lease, registering again if it is gone.
    pub async fn keep_alive(&self) -> Result<()> {
        if let Some(lease) = self.lease.get() {
            match self.store.renew_lease(lease).await {
                Ok(()) => {
                    debug!(key = %self.key, lease, "Service lease renewed");
                    return Ok(());
                }
                Err(e) => warn!(key = %self.key, lease, error = %e, "Service lease renewal failed"),
            }
        }
        self.register().await.map(|_| ())
    }

    /// Revoke the lease, removing the member record.
    pub async fn deregister(&self) -> Result<()> {
        if let Some(lease) = self.lease.get() {
            self.lease.set(None);
            self.store.revoke_lease(lease).await?;
            info!(key = %self.key, "Service deregistered");
        }
        Ok(())
    }

    /// Keep the registration alive until shutdown, then deregister.
    pub fn spawn(self, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = (self.ttl / 3).max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.keep_alive().await {
                            warn!(key = %self.key, error = %e, "Service registration lapsed");
                        }
                    }
                }
            }
            if let Err(e) = self.deregister().await {
                warn!(key = %self.key, error = %e, "Deregistration failed");
            }
        })
    }
}
