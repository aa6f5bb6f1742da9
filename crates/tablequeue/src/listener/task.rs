//! Per-task lifecycle listeners

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::api::{TaskExecutionResult, TaskRecord};
use crate::persistence::QueueShardId;
use crate::settings::QueueLocation;
use crate::worker::ProcessingError;

/// Observer of one task's trip through a worker
///
/// Every method defaults to a no-op. Listeners run inline on the worker, so
/// they should be fast and must not block.
pub trait TaskLifecycleListener: Send + Sync {
    /// The row was claimed
    fn picked(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueLocation,
        _record: &TaskRecord,
        _pick_time: Duration,
    ) {
    }

    /// The consumer is about to run
    fn started(&self, _shard_id: &QueueShardId, _location: &QueueLocation, _record: &TaskRecord) {}

    /// The consumer returned a result
    fn executed(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueLocation,
        _record: &TaskRecord,
        _result: &TaskExecutionResult,
        _process_time: Duration,
    ) {
    }

    /// Processing ended, whatever the outcome
    fn finished(&self, _shard_id: &QueueShardId, _location: &QueueLocation, _record: &TaskRecord) {
    }

    /// The consumer or the result handling failed
    fn crashed(
        &self,
        _shard_id: &QueueShardId,
        _location: &QueueLocation,
        _record: &TaskRecord,
        _error: &ProcessingError,
    ) {
    }
}

/// Fans events out to several listeners
///
/// `picked` and `started` run in registration order; `executed`, `finished`
/// and `crashed` run in reverse, so listeners nest like scopes.
#[derive(Default, Clone)]
pub struct CompositeTaskLifecycleListener {
    listeners: Vec<Arc<dyn TaskLifecycleListener>>,
}

impl CompositeTaskLifecycleListener {
    pub fn new(listeners: Vec<Arc<dyn TaskLifecycleListener>>) -> Self {
        Self { listeners }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TaskLifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl TaskLifecycleListener for CompositeTaskLifecycleListener {
    fn picked(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        record: &TaskRecord,
        pick_time: Duration,
    ) {
        for listener in &self.listeners {
            listener.picked(shard_id, location, record, pick_time);
        }
    }

    fn started(&self, shard_id: &QueueShardId, location: &QueueLocation, record: &TaskRecord) {
        for listener in &self.listeners {
            listener.started(shard_id, location, record);
        }
    }

    fn executed(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        record: &TaskRecord,
        result: &TaskExecutionResult,
        process_time: Duration,
    ) {
        for listener in self.listeners.iter().rev() {
            listener.executed(shard_id, location, record, result, process_time);
        }
    }

    fn finished(&self, shard_id: &QueueShardId, location: &QueueLocation, record: &TaskRecord) {
        for listener in self.listeners.iter().rev() {
            listener.finished(shard_id, location, record);
        }
    }

    fn crashed(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        record: &TaskRecord,
        error: &ProcessingError,
    ) {
        for listener in self.listeners.iter().rev() {
            listener.crashed(shard_id, location, record, error);
        }
    }
}

/// Writes task events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTaskLifecycleListener;

impl TaskLifecycleListener for LoggingTaskLifecycleListener {
    fn picked(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        record: &TaskRecord,
        pick_time: Duration,
    ) {
        debug!(
            %shard_id,
            queue_id = %location.queue_id(),
            task_id = record.id,
            pick_time_ms = pick_time.as_millis() as u64,
            "task picked"
        );
    }

    fn started(&self, shard_id: &QueueShardId, location: &QueueLocation, record: &TaskRecord) {
        debug!(
            %shard_id,
            queue_id = %location.queue_id(),
            task_id = record.id,
            attempt = record.attempts_count,
            "consuming task"
        );
    }

    fn executed(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        record: &TaskRecord,
        result: &TaskExecutionResult,
        process_time: Duration,
    ) {
        info!(
            %shard_id,
            queue_id = %location.queue_id(),
            task_id = record.id,
            ?result,
            process_time_ms = process_time.as_millis() as u64,
            "task executed"
        );
    }

    fn crashed(
        &self,
        shard_id: &QueueShardId,
        location: &QueueLocation,
        record: &TaskRecord,
        error: &ProcessingError,
    ) {
        error!(
            %shard_id,
            queue_id = %location.queue_id(),
            task_id = record.id,
            %error,
            "error while processing task"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::QueueId;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl TaskLifecycleListener for Recorder {
        fn started(&self, _: &QueueShardId, _: &QueueLocation, _: &TaskRecord) {
            self.log.lock().push(format!("{}:started", self.name));
        }

        fn executed(
            &self,
            _: &QueueShardId,
            _: &QueueLocation,
            _: &TaskRecord,
            _: &TaskExecutionResult,
            _: Duration,
        ) {
            self.log.lock().push(format!("{}:executed", self.name));
        }
    }

    #[test]
    fn test_composite_nests_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeTaskLifecycleListener::default()
            .with_listener(Arc::new(Recorder {
                name: "l1",
                log: Arc::clone(&log),
            }))
            .with_listener(Arc::new(Recorder {
                name: "l2",
                log: Arc::clone(&log),
            }));

        let shard = QueueShardId::new("s");
        let location = QueueLocation::new(QueueId::new("q"), "t");
        let now = Utc::now();
        let record = TaskRecord {
            id: 1,
            payload: None,
            attempts_count: 1,
            reenqueue_attempts_count: 0,
            total_attempts_count: 1,
            created_at: now,
            next_process_at: now,
            extra: Default::default(),
        };

        composite.started(&shard, &location, &record);
        composite.executed(
            &shard,
            &location,
            &record,
            &TaskExecutionResult::Finish,
            Duration::ZERO,
        );

        assert_eq!(
            *log.lock(),
            vec!["l1:started", "l2:started", "l2:executed", "l1:executed"]
        );
    }
}
