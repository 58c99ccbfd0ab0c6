//! Store watch driver
//!
//! Opens a watch, loads a snapshot, then feeds every event to a [`WatchSink`]
//! until shutdown. A broken stream is reopened after `retry`, followed by a
//! full resync, for as long as the node runs.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::shutdown::{shutdown_requested, ShutdownSignal};
use crate::store::{CoordinationStore, KeyValue, WatchEvent, WatchStream};
use crate::Result;

/// Local structure mirrored from a store prefix
pub trait WatchSink: Send + Sync + 'static {
    fn apply(&self, event: WatchEvent);

    /// Replace the mirrored state with a full snapshot.
    fn resync(&self, snapshot: Vec<KeyValue>);
}

async fn open(store: &dyn CoordinationStore, prefix: &str) -> Result<(WatchStream, Vec<KeyValue>)> {
    // Watch first so nothing written after the snapshot is missed
    let stream = store.watch(prefix).await?;
    let snapshot = store.snapshot(prefix).await?;
    Ok((stream, snapshot))
}

/// Start mirroring `prefix` into `sink`. Fails only if the first watch or
/// snapshot fails.
pub async fn start_watch(
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    sink: Arc<dyn WatchSink>,
    retry: Duration,
    shutdown: ShutdownSignal,
) -> Result<JoinHandle<()>> {
    let (stream, snapshot) = open(store.as_ref(), &prefix).await?;
    info!(prefix = %prefix, keys = snapshot.len(), "Watch established");
    sink.resync(snapshot);

    Ok(tokio::spawn(run(store, prefix, sink, stream, retry, shutdown)))
}

async fn run(
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    sink: Arc<dyn WatchSink>,
    mut stream: WatchStream,
    retry: Duration,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            event = stream.recv() => match event {
                Some(event) => sink.apply(event),
                None => {
                    warn!(prefix = %prefix, "Watch stream closed, re-subscribing");
                    match reopen(store.as_ref(), &prefix, sink.as_ref(), retry, &mut shutdown).await {
                        Some(reopened) => stream = reopened,
                        None => break,
                    }
                }
            },
        }
    }
    debug!(prefix = %prefix, "Watch stopped");
}

async fn reopen(
    store: &dyn CoordinationStore,
    prefix: &str,
    sink: &dyn WatchSink,
    retry: Duration,
    shutdown: &mut ShutdownSignal,
) -> Option<WatchStream> {
    loop {
        tokio::select! {
            _ = shutdown_requested(shutdown) => return None,
            _ = tokio::time::sleep(retry) => {}
        }
        match open(store, prefix).await {
            Ok((stream, snapshot)) => {
                info!(prefix = %prefix, keys = snapshot.len(), "Watch re-established");
                sink.resync(snapshot);
                return Some(stream);
            }
            Err(e) => warn!(prefix = %prefix, error = %e, "Watch retry failed"),
        }
    }
}
