//! Stub election state machine
//!
//! ```text
//!        count < target            create ok
//!   Idle ───────────────▶ Publishing ─────────▶ Leased
//!    ▲                        │                   │
//!    └── create failed and ───┘                   │
//!    │   count >= target                          │
//!    └────────────── renewal failed ──────────────┘
//! ```
//!
//! Each Publishing attempt advances the slot index by one modulo the target.
//! A failed attempt, whether the slot was taken or the store errored, stays in
//! Publishing until the slot map reports the target reached. Entering Leased
//! fires exactly one `on_registered`; leaving it fires exactly one
//! `on_unregistered`.

use hive_types::{ClusterId, StubSlot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::StubSlotMap;
use crate::routing::Namespace;
use crate::shutdown::{shutdown_requested, ShutdownSignal};
use crate::store::CoordinationStore;
use crate::{ClusterError, Result};

/// Notified when this process gains or loses a stub slot.
pub trait StubListener: Send + Sync + 'static {
    fn on_registered(&self, slot: &StubSlot);
    fn on_unregistered(&self, slot: &StubSlot);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Idle,
    Publishing,
    Leased,
}

/// Role contended for by one election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRole {
    pub name: String,
    /// Cluster-wide slot count
    pub target: i64,
    pub ttl: Duration,
}

pub struct StubElection {
    role: StubRole,
    cluster_id: ClusterId,
    namespace: Namespace,
    store: Arc<dyn CoordinationStore>,
    slots: Arc<StubSlotMap>,
    listener: Arc<dyn StubListener>,
    state: ElectionState,
    state_tx: watch::Sender<ElectionState>,
    index: i64,
    held: Option<StubSlot>,
    renewed_at: Option<Instant>,
}

impl StubElection {
    pub fn new(
        role: StubRole,
        cluster_id: ClusterId,
        namespace: Namespace,
        store: Arc<dyn CoordinationStore>,
        slots: Arc<StubSlotMap>,
        listener: Arc<dyn StubListener>,
    ) -> Self {
        Self {
            role,
            cluster_id,
            namespace,
            store,
            slots,
            listener,
            state: ElectionState::Idle,
            state_tx: watch::channel(ElectionState::Idle).0,
            // First attempt lands on slot 0
            index: -1,
            held: None,
            renewed_at: None,
        }
    }

    pub fn role(&self) -> &str {
        &self.role.name
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn held(&self) -> Option<&StubSlot> {
        self.held.as_ref()
    }

    /// Follow state changes, including after [`spawn`](Self::spawn).
    pub fn subscribe_state(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: ElectionState) {
        self.state = state;
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Perform at most one transition.
    pub async fn step(&mut self) -> ElectionState {
        match self.state {
            ElectionState::Idle => {
                if self.slots.count(&self.role.name) < self.role.target {
                    debug!(role = %self.role.name, "Stub slots below target, publishing");
                    self.set_state(ElectionState::Publishing);
                }
            }
            ElectionState::Publishing => self.publish().await,
            ElectionState::Leased => self.renew().await,
        }
        self.state
    }

    async fn publish(&mut self) {
        self.index = (self.index + 1).rem_euclid(self.role.target.max(1));
        let index = self.index;

        match self.try_claim(index).await {
            Ok(Some(slot)) => {
                info!(role = %slot.role, slot = slot.index, cluster_id = slot.cluster_id, "Stub slot leased");
                self.slots.insert(slot.clone());
                self.held = Some(slot.clone());
                self.renewed_at = Some(Instant::now());
                self.set_state(ElectionState::Leased);
                self.listener.on_registered(&slot);
            }
            Ok(None) => self.idle_if_full(),
            Err(e) => {
                warn!(role = %self.role.name, slot = index, error = %e, "Stub slot claim failed");
                self.idle_if_full();
            }
        }
    }

    fn idle_if_full(&mut self) {
        if self.slots.count(&self.role.name) >= self.role.target {
            debug!(role = %self.role.name, "Stub slots full, idling");
            self.set_state(ElectionState::Idle);
        }
    }

    async fn try_claim(&self, index: i64) -> Result<Option<StubSlot>> {
        let lease = self.store.grant_lease(self.role.ttl).await?;
        let slot = StubSlot {
            role: self.role.name.clone(),
            index,
            cluster_id: self.cluster_id,
            lease_id: lease,
        };
        let record = serde_json::to_vec(&slot)
            .map_err(|e| ClusterError::coordination(format!("stub slot record: {e}")))?;

        let key = self.namespace.stub_key(&slot.role, index);
        if self.store.create_if_absent(&key, record, Some(lease)).await? {
            return Ok(Some(slot));
        }
        if let Err(e) = self.store.revoke_lease(lease).await {
            debug!(lease, error = %e, "Unused stub lease not revoked");
        }
        Ok(None)
    }

    async fn renew(&mut self) {
        let Some(slot) = self.held.clone() else {
            self.set_state(ElectionState::Idle);
            return;
        };
        let due = self
            .renewed_at
            .map_or(true, |at| at.elapsed() >= self.role.ttl / 3);
        if !due {
            return;
        }

        match self.store.renew_lease(slot.lease_id).await {
            Ok(()) => self.renewed_at = Some(Instant::now()),
            Err(e) => {
                warn!(role = %slot.role, slot = slot.index, error = %e, "Stub lease lost");
                self.lose(slot);
            }
        }
    }

    fn lose(&mut self, slot: StubSlot) {
        self.held = None;
        self.renewed_at = None;
        self.set_state(ElectionState::Idle);
        self.listener.on_unregistered(&slot);
    }

    /// Give up the held slot, if any.
    pub async fn release(&mut self) {
        let Some(slot) = self.held.clone() else {
            return;
        };
        if let Err(e) = self.store.revoke_lease(slot.lease_id).await {
            warn!(role = %slot.role, slot = slot.index, error = %e, "Stub lease revoke failed");
        }
        info!(role = %slot.role, slot = slot.index, "Stub slot released");
        self.lose(slot);
    }

    /// Poll `step` every `interval` until shutdown, then release.
    pub fn spawn(mut self, interval: Duration, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        self.step().await;
                    }
                }
            }
            self.release().await;
        })
    }
}
