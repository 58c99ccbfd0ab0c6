//! Worker-id lease
//!
//! Claims a random unused worker id (`{ns}/uuid/{id}`) with a conditional
//! create and holds it under a lease. If the lease is lost the id is claimed
//! again, possibly a different one.

use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::LeaseHandle;
use crate::routing::Namespace;
use crate::shutdown::{shutdown_requested, ShutdownSignal};
use crate::store::CoordinationStore;
use crate::{ClusterError, Result};

/// Highest claimable worker id (10-bit id space)
pub const MAX_WORKER_ID: i64 = 1023;

const CLAIM_ATTEMPTS: usize = 64;

pub struct WorkerIdLease {
    store: Arc<dyn CoordinationStore>,
    namespace: Namespace,
    ttl: Duration,
    worker_id: Arc<AtomicI64>,
    lease: LeaseHandle,
}

impl WorkerIdLease {
    pub fn new(store: Arc<dyn CoordinationStore>, namespace: Namespace, ttl: Duration) -> Self {
        Self {
            store,
            namespace,
            ttl,
            worker_id: Arc::new(AtomicI64::new(-1)),
            lease: LeaseHandle::default(),
        }
    }

    /// Currently held worker id.
    pub fn current(&self) -> Option<i64> {
        match self.worker_id.load(Ordering::SeqCst) {
            id if id < 0 => None,
            id => Some(id),
        }
    }

    /// Shared view of the held worker id for other tasks.
    pub fn watcher(&self) -> Arc<AtomicI64> {
        self.worker_id.clone()
    }

    pub async fn claim(&self) -> Result<i64> {
        for _ in 0..CLAIM_ATTEMPTS {
            let candidate = rand::thread_rng().gen_range(0..=MAX_WORKER_ID);
            let lease = self.store.grant_lease(self.ttl).await?;
            let key = self.namespace.worker_id_key(candidate);
            if self
                .store
                .create_if_absent(&key, candidate.to_string().into_bytes(), Some(lease))
                .await?
            {
                self.lease.set(Some(lease));
                self.worker_id.store(candidate, Ordering::SeqCst);
                info!(worker_id = candidate, lease, "Worker id claimed");
                return Ok(candidate);
            }
            debug!(worker_id = candidate, "Worker id taken, retrying");
            if let Err(e) = self.store.revoke_lease(lease).await {
                debug!(lease, error = %e, "Unused lease not revoked");
            }
        }
        Err(ClusterError::coordination(format!(
            "no free worker id after {CLAIM_ATTEMPTS} attempts"
        )))
    }

    /// Renew the lease, claiming again if it is gone.
    pub async fn keep_alive(&self) -> Result<i64> {
        if let (Some(lease), Some(id)) = (self.lease.get(), self.current()) {
            match self.store.renew_lease(lease).await {
                Ok(()) => return Ok(id),
                Err(e) => warn!(worker_id = id, error = %e, "Worker id lease lost"),
            }
        }
        self.worker_id.store(-1, Ordering::SeqCst);
        self.claim().await
    }

    pub async fn release(&self) -> Result<()> {
        if let Some(lease) = self.lease.get() {
            self.lease.set(None);
            self.worker_id.store(-1, Ordering::SeqCst);
            self.store.revoke_lease(lease).await?;
        }
        Ok(())
    }

    /// Keep the id alive until shutdown, then release it.
    pub fn spawn(self, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = (self.ttl / 3).max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.keep_alive().await {
                            warn!(error = %e, "Worker id unavailable");
                        }
                    }
                }
            }
            if let Err(e) = self.release().await {
                warn!(error = %e, "Worker id release failed");
            }
        })
    }
}
