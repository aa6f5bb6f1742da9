//! Worker pool for one (queue, shard) pair

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::poll_loop::PollLoop;
use super::poller::QueueTaskPoller;
use crate::persistence::QueueShardId;
use crate::settings::{DynamicSetting, ObserverId, ProcessingSettings, QueueId};

struct Worker {
    poll_loop: Arc<PollLoop>,
    cancel: CancellationToken,
    abort: AbortHandle,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<Worker>,
    /// Cancelled workers that may still be finishing an iteration
    retired: Vec<Worker>,
    paused: bool,
    started: bool,
    shutdown: bool,
    observer: Option<ObserverId>,
}

/// Owns the workers of one queue on one shard
///
/// Each worker is a tokio task running a [`PollLoop`] around the shared
/// [`QueueTaskPoller`]. The pool follows the queue's processing setting:
/// a reloaded thread count resizes it without a restart.
///
/// Admin operations (`start`, `resize_pool`, `shutdown`) are not meant to be
/// called concurrently on the same pool.
///
/// # Example
///
/// ```ignore
/// let pool = ExecutionPool::new(queue_id, shard_id, poller, settings.processing.clone());
/// pool.start();
/// pool.resize_pool(4);
/// pool.shutdown();
/// pool.await_termination(Duration::from_secs(5)).await;
/// ```
pub struct ExecutionPool {
    queue_id: QueueId,
    shard_id: QueueShardId,
    poller: Arc<QueueTaskPoller>,
    processing: Arc<DynamicSetting<ProcessingSettings>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    state: Mutex<PoolState>,
}

impl ExecutionPool {
    pub fn new(
        queue_id: QueueId,
        shard_id: QueueShardId,
        poller: Arc<QueueTaskPoller>,
        processing: Arc<DynamicSetting<ProcessingSettings>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue_id,
            shard_id,
            poller,
            processing,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Spawn the configured number of workers and follow thread-count reloads
    ///
    /// Must be called from within a tokio runtime. Calling it twice, or after
    /// shutdown, does nothing.
    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.started || state.shutdown {
            warn!("Execution pool already started");
            return;
        }
        state.started = true;

        let thread_count = self.processing.get().thread_count;
        self.resize_locked(&mut state, thread_count);

        let pool: Weak<Self> = Arc::downgrade(self);
        state.observer = Some(self.processing.register_observer(
            move |old: &ProcessingSettings, new: &ProcessingSettings| {
                if old.thread_count != new.thread_count {
                    if let Some(pool) = pool.upgrade() {
                        pool.resize_pool(new.thread_count);
                    }
                }
                Ok(())
            },
        ));

        info!(thread_count, paused = state.paused, "Execution pool started");
    }

    /// Grow or shrink to `thread_count` workers
    ///
    /// New workers inherit the pool's pause state. Shrinking cancels the most
    /// recently added workers without waiting for them.
    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn resize_pool(&self, thread_count: u32) {
        let mut state = self.state.lock();
        if state.shutdown {
            warn!("Cannot resize a shut down execution pool");
            return;
        }
        self.resize_locked(&mut state, thread_count);
    }

    fn resize_locked(&self, state: &mut PoolState, thread_count: u32) {
        let target = thread_count as usize;
        let current = state.workers.len();
        state.retired.retain(|worker| !worker.abort.is_finished());

        if target > current {
            for _ in current..target {
                let worker = self.spawn_worker(state.paused);
                state.workers.push(worker);
            }
        } else {
            while state.workers.len() > target {
                if let Some(worker) = state.workers.pop() {
                    worker.cancel.cancel();
                    state.retired.push(worker);
                }
            }
        }

        if target != current {
            info!(from = current, to = target, "Execution pool resized");
        }
    }

    fn spawn_worker(&self, paused: bool) -> Worker {
        let cancel = self.cancel.child_token();
        let poll_loop = Arc::new(PollLoop::new(cancel.clone(), paused));
        let poller = Arc::clone(&self.poller);

        let worker_loop = Arc::clone(&poll_loop);
        let handle = self.tracker.spawn(async move {
            worker_loop
                .run(|| {
                    let poller = Arc::clone(&poller);
                    let poll_loop = Arc::clone(&worker_loop);
                    async move { poller.poll(&poll_loop).await }
                })
                .await;
        });

        Worker {
            poll_loop,
            cancel,
            abort: handle.abort_handle(),
        }
    }

    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn pause(&self) {
        let mut state = self.state.lock();
        state.paused = true;
        for worker in &state.workers {
            worker.poll_loop.pause();
        }
        debug!("Execution pool paused");
    }

    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn unpause(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        for worker in &state.workers {
            worker.poll_loop.unpause();
        }
        debug!("Execution pool unpaused");
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// End every worker's no-task wait early
    pub fn wakeup(&self) {
        for worker in &self.state.lock().workers {
            worker.poll_loop.request_wake();
        }
    }

    /// Cancel all workers and abort any still running
    ///
    /// Does not wait; use [`await_termination`](Self::await_termination).
    #[instrument(skip(self), fields(queue_id = %self.queue_id, shard_id = %self.shard_id))]
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        if let Some(observer) = state.observer.take() {
            self.processing.remove_observer(observer);
        }

        self.resize_locked(&mut state, 0);
        state.shutdown = true;

        self.cancel.cancel();
        for worker in &state.retired {
            worker.abort.abort();
        }
        self.tracker.close();
        info!("Execution pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// True once shut down and every worker has exited
    pub fn is_terminated(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }

    /// Wait up to `timeout` for termination. Returns whether it terminated;
    /// a pool that was never shut down always times out.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }

    pub fn pool_size(&self) -> usize {
        self.state.lock().workers.len()
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn shard_id(&self) -> &QueueShardId {
        &self.shard_id
    }

    #[cfg(test)]
    fn cancellation_requested(&self) -> Vec<bool> {
        let state = self.state.lock();
        state
            .workers
            .iter()
            .chain(state.retired.iter())
            .map(|w| w.cancel.is_cancelled())
            .collect()
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
