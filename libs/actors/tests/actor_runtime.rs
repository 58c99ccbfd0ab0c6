//! Integration tests for the actor runtime
//!
//! Covers mailbox ordering, dispatch failures, panic isolation, timers,
//! lifecycle restarts and every placement kind.

use hive_actors::{
    shard_index, Actor, ActorContext, ActorError, ActorKind, ActorRef, ActorRegistry, ActorState,
    DispatchTable, ReplySink, TimerMode,
};
use hive_types::{args, Arg, Envelope, EnvelopeHead};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Records every `Bar` argument and flags overlapping dispatch.
struct Foo {
    seen: Arc<Mutex<Vec<i32>>>,
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl Foo {
    fn new(seen: Arc<Mutex<Vec<i32>>>) -> Self {
        Self {
            seen,
            busy: Arc::new(AtomicBool::new(false)),
            overlaps: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn bar(&mut self, _ctx: &mut ActorContext<Self>, (x,): (i32,)) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.seen.lock().push(x);
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Actor for Foo {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new()
            .method("Bar", Foo::bar)
            .method("Boom", |_: &mut Foo, _: &mut ActorContext<Foo>, (): ()| {
                panic!("boom");
            })
            .call("Sum", |foo: &mut Foo, _: &mut ActorContext<Foo>, (): ()| {
                Ok::<_, String>((foo.seen.lock().iter().map(|v| *v as i64).sum::<i64>(),))
            })
            .call("Fail", |_: &mut Foo, _: &mut ActorContext<Foo>, (): ()| {
                Err::<(), _>("refused")
            })
    }
}

fn bar(x: i32) -> Envelope {
    Envelope::new(EnvelopeHead::to_actor("Foo"), "Bar", args![x])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_producer_order_is_preserved() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let foo = Foo::new(Arc::clone(&seen));
    let overlaps = Arc::clone(&foo.overlaps);
    let actor = ActorRef::new(foo);
    assert!(actor.start());

    for x in 0..500 {
        actor.send(bar(x)).unwrap();
    }

    assert!(eventually(|| seen.lock().len() == 500).await);
    assert_eq!(*seen.lock(), (0..500).collect::<Vec<_>>());
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    actor.stop_and_wait().await;
}

#[tokio::test]
async fn test_known_method_dispatched_once_with_argument() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    let actor = registry.register_singleton(Foo::new(Arc::clone(&seen))).unwrap();

    registry.send(bar(42)).unwrap();

    assert!(eventually(|| !seen.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*seen.lock(), vec![42]);
    assert_eq!(actor.metrics().messages_processed, 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_unknown_method_is_structural_and_not_fatal() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    let actor = registry.register_singleton(Foo::new(Arc::clone(&seen))).unwrap();

    let err = registry
        .send(Envelope::new(EnvelopeHead::to_actor("Foo"), "Baz", args![42_i32]))
        .unwrap_err();
    assert!(err.is_structural());
    assert!(matches!(err, ActorError::UnknownMethod { .. }));

    // Bypassing the registry check reaches the worker's own table miss
    actor
        .send(Envelope::new(EnvelopeHead::to_actor("Foo"), "Baz", vec![]))
        .unwrap();
    assert!(eventually(|| actor.metrics().structural_errors == 1).await);

    registry.send(bar(7)).unwrap();
    assert!(eventually(|| *seen.lock() == vec![7]).await);
    assert!(actor.is_running());
    registry.shutdown().await;
}

#[tokio::test]
async fn test_unknown_actor_is_structural() {
    let registry = ActorRegistry::new();
    let err = registry
        .send(Envelope::new(EnvelopeHead::to_actor("Nobody"), "Bar", vec![]))
        .unwrap_err();
    assert!(matches!(err, ActorError::UnknownActor { .. }));
    assert!(err.is_structural());
}

#[tokio::test]
async fn test_argument_mismatch_is_dropped() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    let actor = registry.register_singleton(Foo::new(Arc::clone(&seen))).unwrap();

    registry
        .send(Envelope::new(EnvelopeHead::to_actor("Foo"), "Bar", args!["42"]))
        .unwrap();
    registry.send(bar(1)).unwrap();

    assert!(eventually(|| *seen.lock() == vec![1]).await);
    assert_eq!(actor.metrics().structural_errors, 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    let actor = registry.register_singleton(Foo::new(Arc::clone(&seen))).unwrap();

    registry
        .send(Envelope::new(EnvelopeHead::to_actor("Foo"), "Boom", vec![]))
        .unwrap();
    registry.send(bar(5)).unwrap();

    assert!(eventually(|| *seen.lock() == vec![5]).await);
    assert_eq!(actor.metrics().dispatch_faults, 1);
    assert!(actor.is_running());
    registry.shutdown().await;
}

#[derive(Default)]
struct CollectingSink {
    replies: Mutex<Vec<(String, Result<Vec<Arg>, String>)>>,
}

impl ReplySink for CollectingSink {
    fn reply(&self, head: &EnvelopeHead, result: Result<Vec<Arg>, String>) {
        self.replies.lock().push((head.reply.clone(), result));
    }
}

#[tokio::test]
async fn test_call_results_reach_reply_sink() {
    let seen = Arc::new(Mutex::new(vec![2, 3]));
    let registry = ActorRegistry::new();
    let sink = Arc::new(CollectingSink::default());
    registry.bind_reply_sink(sink.clone());
    registry.register_singleton(Foo::new(seen)).unwrap();

    let mut head = EnvelopeHead::to_actor("Foo");
    head.reply = "inbox.1".into();
    registry.send_msg(head.clone(), "Sum", ()).unwrap();
    head.reply = "inbox.2".into();
    registry.send_msg(head, "Fail", ()).unwrap();
    // Fire-and-forget produces no reply
    registry.send_msg(EnvelopeHead::to_actor("Foo"), "Sum", ()).unwrap();

    assert!(eventually(|| sink.replies.lock().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let replies = sink.replies.lock();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0], ("inbox.1".to_string(), Ok(vec![Arg::I64(5)])));
    assert_eq!(replies[1], ("inbox.2".to_string(), Err("refused".to_string())));
    drop(replies);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_start_twice_is_noop_and_restart_keeps_state() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let actor = ActorRef::new(Foo::new(Arc::clone(&seen)));
    assert_eq!(actor.state(), ActorState::Idle);
    assert!(actor.start());
    assert!(!actor.start());

    actor.send(bar(1)).unwrap();
    assert!(eventually(|| seen.lock().len() == 1).await);

    actor.stop_and_wait().await;
    assert_eq!(actor.state(), ActorState::Idle);

    assert!(actor.start());
    actor.send(bar(2)).unwrap();
    assert!(eventually(|| *seen.lock() == vec![1, 2]).await);
    actor.stop_and_wait().await;
}

#[tokio::test]
async fn test_mail_sent_before_stop_is_processed() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let actor = ActorRef::new(Foo::new(Arc::clone(&seen)));
    actor.start();

    for x in 0..100 {
        actor.send(bar(x)).unwrap();
    }
    actor.stop_and_wait().await;

    assert_eq!(seen.lock().len(), 100);
    assert_eq!(actor.pending(), 0);
}

#[tokio::test]
async fn test_mail_before_start_waits_for_worker() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let actor = ActorRef::new(Foo::new(Arc::clone(&seen)));
    actor.send(bar(9)).unwrap();
    assert_eq!(actor.pending(), 1);

    actor.start();
    assert!(eventually(|| *seen.lock() == vec![9]).await);
    actor.stop_and_wait().await;
}

#[tokio::test]
async fn test_duplicate_name_halts_registration() {
    let registry = ActorRegistry::new();
    registry
        .register_singleton(Foo::new(Arc::new(Mutex::new(Vec::new()))))
        .unwrap();
    let err = registry
        .register_singleton(Foo::new(Arc::new(Mutex::new(Vec::new()))))
        .unwrap_err();
    assert_eq!(err, ActorError::DuplicateName { name: "Foo".into() });

    let err = registry
        .register_pool(2, |_| Foo::new(Arc::new(Mutex::new(Vec::new()))))
        .unwrap_err();
    assert!(matches!(err, ActorError::DuplicateName { .. }));
    assert_eq!(registry.names(), vec!["Foo".to_string()]);
    registry.shutdown().await;
}

/// Counts timer firings.
#[derive(Default)]
struct Ticker {
    fired: Arc<AtomicUsize>,
    once: Arc<AtomicUsize>,
}

impl Actor for Ticker {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new()
            .method("Arm", |_: &mut Ticker, ctx: &mut ActorContext<Ticker>, (ms,): (u64,)| {
                ctx.register_timer(Duration::from_millis(ms), TimerMode::Repeat, |t: &mut Ticker, ctx: &mut ActorContext<Ticker>| {
                    let n = t.fired.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 3 {
                        ctx.stop();
                    }
                });
            })
            .method("Once", |_: &mut Ticker, ctx: &mut ActorContext<Ticker>, (): ()| {
                ctx.register_timer(Duration::from_millis(5), TimerMode::Once, |t: &mut Ticker, _: &mut ActorContext<Ticker>| {
                    t.once.fetch_add(1, Ordering::SeqCst);
                });
            })
            .call("CancelSoon", |_: &mut Ticker, ctx: &mut ActorContext<Ticker>, (): ()| {
                let handle = ctx.register_timer(Duration::from_millis(20), TimerMode::Once, |t: &mut Ticker, _: &mut ActorContext<Ticker>| {
                    t.once.fetch_add(100, Ordering::SeqCst);
                });
                Ok::<_, String>((ctx.cancel_timer(handle), ctx.timer_count() as u64))
            })
    }
}

#[tokio::test]
async fn test_once_timer_fires_once_on_worker() {
    let ticker = Ticker::default();
    let once = Arc::clone(&ticker.once);
    let actor = ActorRef::new(ticker);
    actor.start();

    actor
        .send(Envelope::new(EnvelopeHead::to_actor("Ticker"), "Once", vec![]))
        .unwrap();
    assert!(eventually(|| once.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(once.load(Ordering::SeqCst), 1);
    assert_eq!(actor.metrics().timers_fired, 1);
    actor.stop_and_wait().await;
}

#[tokio::test]
async fn test_cancelled_timer_never_fires() {
    let ticker = Ticker::default();
    let once = Arc::clone(&ticker.once);
    let actor = ActorRef::new(ticker);
    actor.start();

    actor
        .send(Envelope::new(EnvelopeHead::to_actor("Ticker"), "CancelSoon", vec![]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(once.load(Ordering::SeqCst), 0);
    actor.stop_and_wait().await;
}

#[tokio::test]
async fn test_repeat_timer_cleared_on_teardown() {
    let ticker = Ticker::default();
    let fired = Arc::clone(&ticker.fired);
    let actor = ActorRef::new(ticker);
    actor.start();

    actor
        .send(Envelope::new(EnvelopeHead::to_actor("Ticker"), "Arm", args![5_u64]))
        .unwrap();

    // The third firing requests a stop
    assert!(eventually(|| actor.state() == ActorState::Idle && fired.load(Ordering::SeqCst) >= 3).await);
    let after_stop = fired.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(fired.load(Ordering::SeqCst), after_stop);
}

/// Pool member that records which shard handled each key.
struct Shard {
    index: usize,
    hits: Arc<Mutex<Vec<(usize, i64)>>>,
}

impl Actor for Shard {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new().method("Hit", |s: &mut Shard, ctx: &mut ActorContext<Shard>, (): ()| {
            s.hits.lock().push((s.index, ctx.head().id));
        })
    }
}

#[tokio::test]
async fn test_pool_point_send_is_deterministic() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    let pool = registry
        .register_pool(4, |index| Shard {
            index,
            hits: Arc::clone(&hits),
        })
        .unwrap();
    assert_eq!(pool.size(), 4);
    assert_eq!(registry.kind_of("Shard"), Some(ActorKind::Pool));

    for _ in 0..10 {
        registry
            .send_msg(EnvelopeHead::to_actor("Shard").with_id(17), "Hit", ())
            .unwrap();
    }

    assert!(eventually(|| hits.lock().len() == 10).await);
    assert!(hits.lock().iter().all(|(shard, key)| *shard == 1 && *key == 17));
    registry.shutdown().await;
}

#[tokio::test]
async fn test_pool_broadcast_reaches_every_member() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    registry
        .register_pool(3, |index| Shard {
            index,
            hits: Arc::clone(&hits),
        })
        .unwrap();

    registry
        .send_msg(EnvelopeHead::to_actor("Shard").broadcast(), "Hit", ())
        .unwrap();

    assert!(eventually(|| hits.lock().len() == 3).await);
    let mut shards: Vec<usize> = hits.lock().iter().map(|(s, _)| *s).collect();
    shards.sort();
    assert_eq!(shards, vec![0, 1, 2]);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_empty_pool_rejected() {
    let registry = ActorRegistry::new();
    let err = registry
        .register_pool(0, |index| Shard {
            index,
            hits: Arc::new(Mutex::new(Vec::new())),
        })
        .unwrap_err();
    assert!(matches!(err, ActorError::InvalidPool { .. }));
    assert!(registry.names().is_empty());
}

/// Virtual entity actor.
struct Player {
    hits: Arc<Mutex<Vec<i64>>>,
}

impl Actor for Player {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new().method("Move", |p: &mut Player, ctx: &mut ActorContext<Player>, (): ()| {
            p.hits.lock().push(ctx.id());
        })
    }
}

#[tokio::test]
async fn test_virtual_pool_routing() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    let players = registry.register_virtual::<Player>().unwrap();
    assert!(registry.has_method("Player", "Move"));
    assert!(!registry.has_method("Player", "Fly"));

    players.spawn(5, Player { hits: Arc::clone(&hits) }).unwrap();
    players.spawn(6, Player { hits: Arc::clone(&hits) }).unwrap();

    // Absent and zero ids are dropped without error
    registry
        .send_msg(EnvelopeHead::to_actor("Player").with_id(99), "Move", ())
        .unwrap();
    registry
        .send_msg(EnvelopeHead::to_actor("Player"), "Move", ())
        .unwrap();
    registry
        .send_msg(EnvelopeHead::to_actor("Player").with_id(5), "Move", ())
        .unwrap();
    assert!(eventually(|| *hits.lock() == vec![5]).await);

    registry
        .send_msg(EnvelopeHead::to_actor("Player").topic(), "Move", ())
        .unwrap();
    assert!(eventually(|| hits.lock().len() == 3).await);

    let removed = players.remove(6).unwrap();
    assert!(eventually(|| removed.state() == ActorState::Idle).await);
    assert!(!players.contains(6));
    assert_eq!(players.ids(), vec![5]);

    let err = players
        .spawn(5, Player { hits: Arc::clone(&hits) })
        .unwrap_err();
    assert!(matches!(err, ActorError::DuplicateName { .. }));
    assert!(players.spawn(0, Player { hits }).is_err());

    registry.shutdown().await;
    assert!(players.is_empty());
}

#[tokio::test]
async fn test_virtual_pool_rejects_other_types() {
    let registry = ActorRegistry::new();
    let players = registry.register_virtual::<Player>().unwrap();
    let err = players
        .spawn(3, Foo::new(Arc::new(Mutex::new(Vec::new()))))
        .unwrap_err();
    assert!(matches!(err, ActorError::InvalidPool { .. }));
}

#[tokio::test]
async fn test_packet_handler_accepts_only_known_actors() {
    use hive_actors::PacketHandler;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ActorRegistry::new();
    registry.register_stub(Foo::new(Arc::clone(&seen))).unwrap();
    assert_eq!(registry.kind_of("Foo"), Some(ActorKind::Stub));

    assert!(registry.handle_envelope(&bar(3)));
    assert!(!registry.handle_envelope(&Envelope::new(
        EnvelopeHead::to_actor("Other"),
        "Bar",
        vec![]
    )));
    assert!(eventually(|| *seen.lock() == vec![3]).await);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_packet_handler_answers_failed_calls() {
    use hive_actors::PacketHandler;

    let registry = ActorRegistry::new();
    let sink = Arc::new(CollectingSink::default());
    registry.bind_reply_sink(sink.clone());
    registry
        .register_singleton(Foo::new(Arc::new(Mutex::new(Vec::new()))))
        .unwrap();

    let mut head = EnvelopeHead::to_actor("Foo");
    head.reply = "inbox.9".into();
    assert!(registry.handle_envelope(&Envelope::new(head, "Missing", vec![])));

    let replies = sink.replies.lock();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "inbox.9");
    assert!(replies[0].1.as_ref().unwrap_err().contains("Missing"));
    drop(replies);
    registry.shutdown().await;
}

proptest! {
    #[test]
    fn shard_choice_is_stable_and_in_range(key in any::<i64>(), size in 1usize..64) {
        let first = shard_index(key, size);
        prop_assert!(first < size);
        prop_assert_eq!(first, shard_index(key, size));
        prop_assert_eq!(first as i64, key.rem_euclid(size as i64));
    }
}
