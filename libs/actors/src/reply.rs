//! Reply delivery for call envelopes

use hive_types::{Arg, EnvelopeHead};
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives handler results for envelopes that carry a reply subject.
///
/// Called on the actor's worker; implementations must not block.
pub trait ReplySink: Send + Sync + 'static {
    fn reply(&self, head: &EnvelopeHead, result: std::result::Result<Vec<Arg>, String>);
}

/// Late-bound reply sink shared by every actor of one registry.
#[derive(Clone, Default)]
pub struct ReplyBinding {
    sink: Arc<RwLock<Option<Arc<dyn ReplySink>>>>,
}

impl ReplyBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, sink: Arc<dyn ReplySink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn get(&self) -> Option<Arc<dyn ReplySink>> {
        self.sink.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.sink.read().is_some()
    }
}

impl std::fmt::Debug for ReplyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyBinding")
            .field("bound", &self.is_bound())
            .finish()
    }
}
