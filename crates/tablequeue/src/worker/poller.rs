//! One worker iteration with pacing

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;

use super::poll_loop::{PollLoop, WakePolicy};
use super::runner::{QueueProcessingStatus, QueueRunner};
use super::{panic_message, ProcessingError};
use crate::listener::ThreadLifecycleListener;
use crate::persistence::QueueShardId;
use crate::settings::{DynamicSetting, PollSettings, QueueLocation};

/// Runs the queue once, then waits according to the outcome
///
/// | outcome   | wait                   | wakeups        |
/// |-----------|------------------------|----------------|
/// | skipped   | `no_task_timeout`      | shorten it     |
/// | processed | `between_task_timeout` | absorbed       |
/// | crashed   | `fatal_crash_timeout`  | absorbed       |
pub struct QueueTaskPoller {
    runner: Arc<dyn QueueRunner>,
    shard_id: QueueShardId,
    location: QueueLocation,
    poll: Arc<DynamicSetting<PollSettings>>,
    listener: Arc<dyn ThreadLifecycleListener>,
}

impl QueueTaskPoller {
    pub fn new(
        runner: Arc<dyn QueueRunner>,
        shard_id: QueueShardId,
        location: QueueLocation,
        poll: Arc<DynamicSetting<PollSettings>>,
        listener: Arc<dyn ThreadLifecycleListener>,
    ) -> Self {
        Self {
            runner,
            shard_id,
            location,
            poll,
            listener,
        }
    }

    pub async fn poll(&self, poll_loop: &PollLoop) {
        self.listener.started(&self.shard_id, &self.location);
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(self.runner.run_queue())
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(ProcessingError::Panicked(panic_message(panic))),
        };

        match outcome {
            Ok(status) => {
                let processed = status == QueueProcessingStatus::Processed;
                self.listener
                    .executed(&self.shard_id, &self.location, processed, started.elapsed());
                let (timeout, policy) = {
                    let poll = self.poll.get();
                    if processed {
                        (poll.between_task_timeout, WakePolicy::Deny)
                    } else {
                        (poll.no_task_timeout, WakePolicy::Allow)
                    }
                };
                poll_loop.wait(timeout, policy).await;
            }
            Err(err) => {
                self.listener.crashed(&self.shard_id, &self.location, &err);
                let timeout = self.poll.get().fatal_crash_timeout;
                poll_loop.wait(timeout, WakePolicy::Deny).await;
            }
        }

        self.listener.finished(&self.shard_id, &self.location);
    }
}
