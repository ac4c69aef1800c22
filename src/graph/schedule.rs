//! Host-driven scheduling of deferred graph work.
//!
//! The graph never runs its own event loop. When it has deferred work it asks the [Scheduler] for
//! one flush of the corresponding [FlushQueue]; the host answers by calling
//! [crate::graph::Graph::flush_remote_queue] or [crate::graph::Graph::flush_local_queue] (or
//! simply [crate::graph::Graph::flush]) once per turn.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlushQueue {
    /// Pushed remote operations waiting to be applied as one transaction.
    Coalesce,
    /// Collection edges whose local view must be rebuilt from the remote view.
    Sync,
}

pub trait Scheduler: Send + Sync {
    /// Called at most once per queue until that queue has been flushed.
    fn schedule(&self, queue: FlushQueue);
}

/// A [Scheduler] that records requests for the host to drain once per tick.
#[derive(Debug, Default)]
pub struct TickScheduler {
    pending: Mutex<Vec<FlushQueue>>,
}

impl TickScheduler {
    pub fn new() -> Self {
        TickScheduler::default()
    }

    /// Requested flushes, in request order. Clears the pending list.
    pub fn take_pending(&self) -> Vec<FlushQueue> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&self, queue: FlushQueue) {
        let mut pending = self.pending.lock();
        if !pending.contains(&queue) {
            pending.push(queue);
        }
    }
}
