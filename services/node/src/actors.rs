//! Actors every node hosts
//!
//! `Presence` answers liveness calls and keeps a heartbeat timer. `ChatMgr`
//! is the stub role a node takes when its configuration lists it; it only
//! records which cluster holds each slot.

use hive_actors::{Actor, ActorContext, DispatchTable, TimerMode};
use hive_network::{ON_STUB_REGISTER, ON_STUB_UNREGISTER};
use hive_types::ClusterId;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

const HEARTBEAT: Duration = Duration::from_secs(30);

pub struct Presence {
    label: String,
    pings: u64,
    beats: u64,
}

impl Presence {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pings: 0,
            beats: 0,
        }
    }
}

impl Actor for Presence {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new()
            .call(
                "Ping",
                |actor: &mut Presence, _: &mut ActorContext<Presence>, (): ()| {
                    actor.pings += 1;
                    Ok::<_, String>((actor.label.clone(), actor.pings as i64))
                },
            )
            .method(
                "Note",
                |actor: &mut Presence, ctx: &mut ActorContext<Presence>, (text,): (String,)| {
                    info!(node = %actor.label, from = ctx.head().src_cluster_id, %text, "Note received");
                },
            )
    }

    fn started(&mut self, ctx: &mut ActorContext<Self>) {
        ctx.register_timer(HEARTBEAT, TimerMode::Repeat, |actor: &mut Presence, _| {
            actor.beats += 1;
            debug!(node = %actor.label, beats = actor.beats, pings = actor.pings, "Heartbeat");
        });
    }
}

#[derive(Default)]
pub struct ChatMgr {
    holders: BTreeMap<i64, ClusterId>,
}

impl Actor for ChatMgr {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new()
            .method(
                ON_STUB_REGISTER,
                |actor: &mut ChatMgr, _: &mut ActorContext<ChatMgr>, (index, cluster): (i64, ClusterId)| {
                    actor.holders.insert(index, cluster);
                    info!(slot = index, cluster, held = actor.holders.len(), "ChatMgr slot taken");
                },
            )
            .method(
                ON_STUB_UNREGISTER,
                |actor: &mut ChatMgr, _: &mut ActorContext<ChatMgr>, (index, cluster): (i64, ClusterId)| {
                    if actor.holders.get(&index) == Some(&cluster) {
                        actor.holders.remove(&index);
                    }
                    info!(slot = index, cluster, held = actor.holders.len(), "ChatMgr slot freed");
                },
            )
    }
}
