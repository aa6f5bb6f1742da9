//! Per-worker iteration listeners

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, trace};

use crate::persistence::QueueShardId;
use crate::settings::QueueLocation;
use crate::worker::ProcessingError;

/// Observer of worker iterations
pub trait ThreadLifecycleListener: Send + Sync {
    /// An iteration began
    fn started(&self, _shard_id: &QueueShardId, _location: &QueueLocation) {}

    /// The queue runner returned; `processed` is false for an empty pick
    fn executed(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueLocation,
        _processed: bool,
        _elapsed: Duration,
    ) {
    }

    /// The iteration ended, whatever the outcome
    fn finished(&self, _shard_id: &QueueShardId, _location: &QueueLocation) {}

    /// The iteration failed outside task processing
    fn crashed(&self, _shard_id: &QueueShardId, _location: &QueueLocation, _error: &ProcessingError) {
    }
}

/// Fans worker events out to several listeners
///
/// `started` runs in registration order; the rest run in reverse.
#[derive(Default, Clone)]
pub struct CompositeThreadLifecycleListener {
    listeners: Vec<Arc<dyn ThreadLifecycleListener>>,
}

impl CompositeThreadLifecycleListener {
    pub fn new(listeners: Vec<Arc<dyn ThreadLifecycleListener>>) -> Self {
        Self { listeners }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ThreadLifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl ThreadLifecycleListener for CompositeThreadLifecycleListener {
    fn started(&self, shard_id: &QueueShardId, location: &QueueLocation) {
        for listener in &self.listeners {
            listener.started(shard_id, location);
        }
    }

    fn executed(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        processed: bool,
        elapsed: Duration,
    ) {
        for listener in self.listeners.iter().rev() {
            listener.executed(shard_id, location, processed, elapsed);
        }
    }

    fn finished(&self, shard_id: &QueueShardId, location: &QueueLocation) {
        for listener in self.listeners.iter().rev() {
            listener.finished(shard_id, location);
        }
    }

    fn crashed(&self, shard_id: &QueueShardId, location: &QueueLocation, error: &ProcessingError) {
        for listener in self.listeners.iter().rev() {
            listener.crashed(shard_id, location, error);
        }
    }
}

/// Writes worker events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingThreadLifecycleListener;

impl ThreadLifecycleListener for LoggingThreadLifecycleListener {
    fn executed(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        processed: bool,
        elapsed: Duration,
    ) {
        trace!(
            %shard_id,
            queue_id = %location.queue_id(),
            processed,
            elapsed_ms = elapsed.as_millis() as u64,
            "queue iteration executed"
        );
    }

    fn crashed(&self, shard_id: &QueueShardId, location: &QueueLocation, error: &ProcessingError) {
        error!(
            %shard_id,
            queue_id = %location.queue_id(),
            %error,
            "fatal error in queue worker, backing off"
        );
    }
}
