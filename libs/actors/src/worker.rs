//! Actor worker loop
//!
//! One tokio task per running actor. The task waits on either the mailbox
//! wake or the stop signal, with the wake polled first, and drains the
//! mailbox to empty in enqueue order on every wake. Handler and timer panics
//! are caught per unit of work.

use hive_types::{Arg, Envelope, EnvelopeHead};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::actor::{Actor, ActorContext, ActorRef};
use crate::dispatch::{DispatchTable, Outcome};
use crate::error::ActorError;
use crate::mailbox::{Mail, Mailbox};
use crate::metrics::ActorMetrics;
use crate::reply::ReplyBinding;
use crate::timer::{TimerHandle, TimerMode};

/// Type-erased owner of an idle actor value.
pub(crate) trait WorkerCell: Send + 'static {
    fn spawn(self: Box<Self>, actor: ActorRef) -> JoinHandle<()>;
}

pub(crate) struct ActorCell<A: Actor> {
    actor: A,
    table: DispatchTable<A>,
    ctx: ActorContext<A>,
    reply: ReplyBinding,
    metrics: Arc<ActorMetrics>,
}

impl<A: Actor> WorkerCell for ActorCell<A> {
    fn spawn(self: Box<Self>, actor: ActorRef) -> JoinHandle<()> {
        tokio::spawn(run(actor, *self))
    }
}

async fn run<A: Actor>(actor: ActorRef, mut cell: ActorCell<A>) {
    let shared = Arc::clone(actor.shared());
    info!(
        actor = %shared.name,
        actor_id = shared.id,
        kind = ?shared.kind,
        "Actor worker started"
    );

    cell.started();

    loop {
        tokio::select! {
            biased;

            _ = shared.mailbox.woken() => cell.drain(&shared.mailbox),
            _ = shared.stop_signal.notified() => break,
        }
    }

    // Mail accepted before the stop request still runs
    cell.drain(&shared.mailbox);
    cell.teardown();

    let stats = shared.metrics.snapshot();
    shared.park(Box::new(cell));
    info!(
        actor = %shared.name,
        actor_id = shared.id,
        messages_processed = stats.messages_processed,
        dispatch_faults = stats.dispatch_faults,
        "Actor worker stopped"
    );
}

impl<A: Actor> ActorCell<A> {
    pub(crate) fn new(
        actor: A,
        table: DispatchTable<A>,
        ctx: ActorContext<A>,
        reply: ReplyBinding,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            actor,
            table,
            ctx,
            reply,
            metrics,
        }
    }

    fn started(&mut self) {
        self.ctx.head = EnvelopeHead::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.actor.started(&mut self.ctx);
        }));
        if let Err(payload) = result {
            ActorMetrics::incr(&self.metrics.dispatch_faults);
            error!(
                actor = %self.ctx.name(),
                panic = %panic_message(payload.as_ref()),
                "started hook panicked"
            );
        }
    }

    fn teardown(&mut self) {
        self.ctx.timers.clear();
        self.ctx.head = EnvelopeHead::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.actor.stopped(&mut self.ctx);
        }));
        if let Err(payload) = result {
            ActorMetrics::incr(&self.metrics.dispatch_faults);
            error!(
                actor = %self.ctx.name(),
                panic = %panic_message(payload.as_ref()),
                "stopped hook panicked"
            );
        }
        // Timers registered by the stopped hook never fire
        self.ctx.timers.clear();
    }

    fn drain(&mut self, mailbox: &Mailbox) {
        mailbox.clear_wake();
        while let Some(mail) = mailbox.pop() {
            match mail {
                Mail::Envelope(envelope) => self.dispatch(envelope),
                Mail::Timer(handle) => self.fire_timer(handle),
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { head, method, args } = envelope;

        let Some(handler) = self.table.get(&method) else {
            let err = ActorError::unknown_method(self.ctx.name(), method.as_str());
            ActorMetrics::incr(&self.metrics.structural_errors);
            error!(
                actor = %self.ctx.name(),
                method = %method,
                error = %err,
                "Structural error, envelope dropped"
            );
            self.reply(&head, Err(err.to_string()));
            return;
        };

        self.ctx.head = head.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler(&mut self.actor, &mut self.ctx, args)
        }));
        ActorMetrics::incr(&self.metrics.messages_processed);

        match result {
            Ok(Ok(Outcome::Done)) => self.reply(&head, Ok(Vec::new())),
            Ok(Ok(Outcome::Reply(values))) => self.reply(&head, Ok(values)),
            Ok(Ok(Outcome::Failed(message))) => {
                debug!(
                    actor = %self.ctx.name(),
                    method = %method,
                    error = %message,
                    "Handler returned error"
                );
                self.reply(&head, Err(message));
            }
            Ok(Err(source)) => {
                let err = ActorError::ArgumentMismatch {
                    actor: self.ctx.name().to_string(),
                    method: method.clone(),
                    source,
                };
                ActorMetrics::incr(&self.metrics.structural_errors);
                error!(
                    actor = %self.ctx.name(),
                    method = %method,
                    error = %err,
                    "Structural error, envelope dropped"
                );
                self.reply(&head, Err(err.to_string()));
            }
            Err(payload) => {
                let err = ActorError::DispatchFault {
                    actor: self.ctx.name().to_string(),
                    method: method.clone(),
                    message: panic_message(payload.as_ref()),
                };
                ActorMetrics::incr(&self.metrics.dispatch_faults);
                error!(
                    actor = %self.ctx.name(),
                    method = %method,
                    error = %err,
                    "Handler panicked, worker continues"
                );
                self.reply(&head, Err(err.to_string()));
            }
        }
    }

    fn fire_timer(&mut self, handle: TimerHandle) {
        // Cancelled, or fired after a restart
        let Some((mode, callback)) = self.ctx.timers.take(handle) else {
            return;
        };

        self.ctx.head = EnvelopeHead::default();
        ActorMetrics::incr(&self.metrics.timers_fired);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut callback = callback;
            callback(&mut self.actor, &mut self.ctx);
            callback
        }));

        match result {
            Ok(callback) => {
                if mode == TimerMode::Repeat {
                    self.ctx.timers.restore(handle, callback);
                }
            }
            Err(payload) => {
                ActorMetrics::incr(&self.metrics.dispatch_faults);
                error!(
                    actor = %self.ctx.name(),
                    timer = %handle,
                    panic = %panic_message(payload.as_ref()),
                    "Timer callback panicked, timer cancelled"
                );
                self.ctx.timers.cancel(handle);
            }
        }
    }

    fn reply(&self, head: &EnvelopeHead, result: Result<Vec<Arg>, String>) {
        if !head.is_call() {
            return;
        }
        match self.reply.get() {
            Some(sink) => {
                sink.reply(head, result);
                ActorMetrics::incr(&self.metrics.replies_sent);
            }
            None => debug!(
                actor = %self.ctx.name(),
                reply = %head.reply,
                "No reply sink bound, result dropped"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
