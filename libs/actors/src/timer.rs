//! Per-actor timers
//!
//! A timer's callback lives in the owning actor's table. The scheduling task
//! only ever enqueues a `Mail::Timer` into the actor's mailbox, so callbacks
//! run on the worker, in mailbox order, with `&mut` access to the actor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::actor::{Actor, ActorContext, Shared};
use crate::mailbox::Mail;

/// Opaque handle to a registered timer. Never reused within one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once after the delay, then forget the timer.
    Once,
    /// Fire every `delay` until cancelled.
    Repeat,
}

pub(crate) type TimerCallback<A> = Box<dyn FnMut(&mut A, &mut ActorContext<A>) + Send>;

struct TimerEntry<A: Actor> {
    mode: TimerMode,
    callback: Option<TimerCallback<A>>,
    task: JoinHandle<()>,
}

pub(crate) struct TimerTable<A: Actor> {
    next: u64,
    entries: HashMap<TimerHandle, TimerEntry<A>>,
}

impl<A: Actor> TimerTable<A> {
    pub(crate) fn new() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn register(
        &mut self,
        owner: Weak<Shared>,
        delay: Duration,
        mode: TimerMode,
        callback: TimerCallback<A>,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next);
        self.next += 1;

        let task = tokio::spawn(schedule(owner, handle, delay, mode));
        self.entries.insert(
            handle,
            TimerEntry {
                mode,
                callback: Some(callback),
                task,
            },
        );
        handle
    }

    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.entries.remove(&handle) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    /// Take the callback for a fired timer. Once timers leave the table here.
    pub(crate) fn take(&mut self, handle: TimerHandle) -> Option<(TimerMode, TimerCallback<A>)> {
        let entry = self.entries.get_mut(&handle)?;
        let mode = entry.mode;
        let callback = entry.callback.take()?;
        if mode == TimerMode::Once {
            self.entries.remove(&handle);
        }
        Some((mode, callback))
    }

    /// Hand a repeat callback back. Dropped if the timer was cancelled meanwhile.
    pub(crate) fn restore(&mut self, handle: TimerHandle, callback: TimerCallback<A>) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.callback = Some(callback);
        }
    }

    pub(crate) fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.task.abort();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

async fn schedule(owner: Weak<Shared>, handle: TimerHandle, delay: Duration, mode: TimerMode) {
    match mode {
        TimerMode::Once => {
            tokio::time::sleep(delay).await;
            fire(&owner, handle);
        }
        TimerMode::Repeat => {
            let start = tokio::time::Instant::now() + delay;
            let mut ticks = tokio::time::interval_at(start, delay.max(Duration::from_millis(1)));
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if !fire(&owner, handle) {
                    break;
                }
            }
        }
    }
}

fn fire(owner: &Weak<Shared>, handle: TimerHandle) -> bool {
    match owner.upgrade() {
        Some(shared) => {
            trace!(actor = %shared.name, timer = %handle, "Timer fired");
            shared.mailbox.push(Mail::Timer(handle));
            true
        }
        None => false,
    }
}
