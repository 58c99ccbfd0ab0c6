//! Actor trait, actor references and the per-dispatch context
//!
//! An [`ActorRef`] is the only handle the rest of the runtime holds. The actor
//! value itself lives inside the reference while idle and is moved into the
//! worker task on [`ActorRef::start`]; teardown hands it back, so a stopped
//! actor can be started again.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Running ──stop() + one tick──▶ Stopping ──teardown──▶ Idle
//! ```

use hive_types::{Envelope, EnvelopeHead, EntityId};
use parking_lot::Mutex;
use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatch::DispatchTable;
use crate::error::{ActorError, Result};
use crate::mailbox::{Mail, Mailbox};
use crate::metrics::{ActorMetrics, ActorStats};
use crate::reply::ReplyBinding;
use crate::timer::{TimerHandle, TimerMode, TimerTable};
use crate::worker::{ActorCell, WorkerCell};

/// Deferred stop trigger
pub const STOP_TICK: Duration = Duration::from_millis(10);

static NEXT_ACTOR_ID: AtomicI64 = AtomicI64::new(1);

/// Process-unique actor id.
pub fn assign_actor_id() -> EntityId {
    NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Last path segment of a type name, without generic parameters.
pub fn short_type_name<T: ?Sized>() -> String {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Behaviour every actor type provides.
pub trait Actor: Send + Sized + 'static {
    /// Callable methods of this actor type.
    fn dispatch_table() -> DispatchTable<Self>;

    /// Registry name. Defaults to the type's short name.
    fn actor_name() -> String {
        short_type_name::<Self>()
    }

    /// Runs on the worker before the first envelope.
    fn started(&mut self, _ctx: &mut ActorContext<Self>) {}

    /// Runs on the worker after the last envelope, timers already cleared.
    fn stopped(&mut self, _ctx: &mut ActorContext<Self>) {}
}

/// Placement kind of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Singleton,
    Virtual,
    Pool,
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl ActorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ActorState::Running,
            2 => ActorState::Stopping,
            _ => ActorState::Idle,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) kind: ActorKind,
    state: AtomicU8,
    pub(crate) mailbox: Mailbox,
    pub(crate) stop_signal: Notify,
    methods: HashSet<String>,
    cell: Mutex<Option<Box<dyn WorkerCell>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) metrics: Arc<ActorMetrics>,
}

impl Shared {
    fn transition(&self, from: ActorState, to: ActorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn request_stop(&self) {
        if self.transition(ActorState::Running, ActorState::Stopping) {
            debug!(actor = %self.name, actor_id = self.id, "Stop requested");
            self.stop_signal.notify_one();
        }
    }

    /// Return the actor value after teardown and reopen the lifecycle.
    pub(crate) fn park(&self, cell: Box<dyn WorkerCell>) {
        *self.cell.lock() = Some(cell);
        self.state.store(ActorState::Idle as u8, Ordering::Release);
    }
}

/// Cloneable handle to one actor instance.
#[derive(Clone)]
pub struct ActorRef {
    shared: Arc<Shared>,
}

impl ActorRef {
    /// Initialise a singleton-kind actor with no reply sink.
    pub fn new<A: Actor>(actor: A) -> Self {
        Self::build(actor, ActorKind::Singleton, None, ReplyBinding::new())
    }

    /// Initialise an actor; `id` defaults to a fresh process-unique id.
    pub fn build<A: Actor>(
        actor: A,
        kind: ActorKind,
        id: Option<EntityId>,
        reply: ReplyBinding,
    ) -> Self {
        let table = A::dispatch_table();
        let methods = table.method_names();
        let id = id.unwrap_or_else(assign_actor_id);
        let name = A::actor_name();
        let metrics = Arc::new(ActorMetrics::default());

        let shared = Arc::new_cyclic(|owner: &Weak<Shared>| {
            let cell = ActorCell::new(
                actor,
                table,
                ActorContext::new(owner.clone(), id, name.clone()),
                reply,
                Arc::clone(&metrics),
            );
            Shared {
                id,
                name,
                kind,
                state: AtomicU8::new(ActorState::Idle as u8),
                mailbox: Mailbox::new(),
                stop_signal: Notify::new(),
                methods,
                cell: Mutex::new(Some(Box::new(cell) as Box<dyn WorkerCell>)),
                task: Mutex::new(None),
                metrics,
            }
        });

        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn id(&self) -> EntityId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> ActorKind {
        self.shared.kind
    }

    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ActorState::Running
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.shared.methods.contains(method)
    }

    pub fn methods(&self) -> &HashSet<String> {
        &self.shared.methods
    }

    /// Envelopes waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.shared.mailbox.len()
    }

    pub fn metrics(&self) -> ActorStats {
        self.shared.metrics.snapshot()
    }

    /// Idle → Running and spawn the worker. Returns false if already started.
    pub fn start(&self) -> bool {
        if !self.shared.transition(ActorState::Idle, ActorState::Running) {
            return false;
        }

        let cell = self.shared.cell.lock().take();
        match cell {
            Some(cell) => {
                let task = cell.spawn(self.clone());
                *self.shared.task.lock() = Some(task);
                true
            }
            None => {
                // Previous worker has not parked the actor yet
                warn!(actor = %self.shared.name, "Start raced with teardown");
                self.shared
                    .state
                    .store(ActorState::Idle as u8, Ordering::Release);
                false
            }
        }
    }

    /// Enqueue an envelope. Mail sent before `start` waits for the worker.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        if self.state() == ActorState::Stopping {
            return Err(ActorError::NotRunning {
                name: self.shared.name.clone(),
            });
        }
        self.shared.mailbox.push(Mail::Envelope(envelope));
        Ok(())
    }

    /// Cooperative stop: after one tick the worker finishes its current drain
    /// and tears down. A no-op unless running.
    pub fn stop(&self) {
        if self.state() != ActorState::Running {
            return;
        }

        let owner = Arc::downgrade(&self.shared);
        let request = async move {
            tokio::time::sleep(STOP_TICK).await;
            if let Some(shared) = owner.upgrade() {
                shared.request_stop();
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(request);
            }
            Err(_) => self.shared.request_stop(),
        }
    }

    /// Stop and wait until the worker has torn down.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(actor = %self.shared.name, error = %e, "Actor worker ended abnormally");
                }
            }
        }
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Per-actor context handed to every handler and timer callback.
pub struct ActorContext<A: Actor> {
    owner: Weak<Shared>,
    id: EntityId,
    name: String,
    pub(crate) head: EnvelopeHead,
    pub(crate) timers: TimerTable<A>,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(owner: Weak<Shared>, id: EntityId, name: String) -> Self {
        Self {
            owner,
            id,
            name,
            head: EnvelopeHead::default(),
            timers: TimerTable::new(),
        }
    }

    /// Head of the envelope being handled; default inside timer callbacks.
    pub fn head(&self) -> &EnvelopeHead {
        &self.head
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to this actor. Always present while the worker runs.
    pub fn me(&self) -> Option<ActorRef> {
        self.owner.upgrade().map(|shared| ActorRef { shared })
    }

    pub fn register_timer<F>(&mut self, delay: Duration, mode: TimerMode, callback: F) -> TimerHandle
    where
        F: FnMut(&mut A, &mut ActorContext<A>) + Send + 'static,
    {
        self.timers
            .register(self.owner.clone(), delay, mode, Box::new(callback))
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Request this actor's own stop.
    pub fn stop(&self) {
        if let Some(me) = self.me() {
            me.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    struct Generic<T>(T);

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<Plain>(), "Plain");
        assert_eq!(short_type_name::<Generic<u8>>(), "Generic");
    }

    #[test]
    fn test_assigned_ids_are_unique() {
        let a = assign_actor_id();
        let b = assign_actor_id();
        assert!(b > a);
    }
}
