//! Multi-queue, multi-shard facade
//!
//! ```text
//!                      QueueService
//!   queue id ──► { shard id ──► ExecutionPool }
//!
//!   emails   ──► { main ──► pool(2 workers), replica ──► pool(2 workers) }
//!   invoices ──► { main ──► pool(1 worker),  replica ──► pool(1 worker)  }
//! ```
//!
//! Every registered queue gets one [`ExecutionPool`] per shard. Lifecycle
//! operations exist per queue and for all queues at once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::api::QueueConsumer;
use crate::listener::{
    LoggingTaskLifecycleListener, LoggingThreadLifecycleListener, TaskLifecycleListener,
    ThreadLifecycleListener,
};
use crate::persistence::{QueueShard, QueueShardId};
use crate::reliability::TimeLimiter;
use crate::settings::{ProcessingSettings, QueueConfig, QueueId, QueueSettings};
use crate::worker::{ConsumerQueueRunner, ExecutionPool, QueueTaskPoller, RunnerError};

/// Queue service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("queue is not registered: {0}")]
    QueueNotRegistered(QueueId),

    #[error("shard not found: {0}")]
    ShardNotFound(QueueShardId),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

struct RegisteredQueue {
    settings: QueueSettings,
    pools: BTreeMap<QueueShardId, Arc<ExecutionPool>>,
}

/// Registry of queues and their execution pools
///
/// # Example
///
/// ```ignore
/// let service = QueueService::new(vec![QueueShard::new("main".into(), Arc::new(dao))]);
/// service.register_queue(Arc::new(EmailConsumer::new(config)))?;
/// service.start_all();
///
/// // on reload
/// let diffs = service.update_queue_configs(reader.read()?)?;
///
/// service.shutdown_all();
/// let pending = service.await_termination_all(Duration::from_secs(30)).await;
/// ```
pub struct QueueService {
    shards: BTreeMap<QueueShardId, QueueShard>,
    task_listener: Arc<dyn TaskLifecycleListener>,
    thread_listener: Arc<dyn ThreadLifecycleListener>,
    queues: RwLock<HashMap<QueueId, RegisteredQueue>>,
}

impl QueueService {
    /// Create a service over the given shards, logging lifecycle events
    pub fn new(shards: Vec<QueueShard>) -> Self {
        Self {
            shards: shards
                .into_iter()
                .map(|shard| (shard.shard_id().clone(), shard))
                .collect(),
            task_listener: Arc::new(LoggingTaskLifecycleListener),
            thread_listener: Arc::new(LoggingThreadLifecycleListener),
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Set the task listener used for queues registered afterwards
    pub fn with_task_listener(mut self, listener: Arc<dyn TaskLifecycleListener>) -> Self {
        self.task_listener = listener;
        self
    }

    /// Set the thread listener used for queues registered afterwards
    pub fn with_thread_listener(mut self, listener: Arc<dyn ThreadLifecycleListener>) -> Self {
        self.thread_listener = listener;
        self
    }

    /// Create the execution pools of a consumer's queue
    ///
    /// Returns false, leaving the first registration in place, when the
    /// queue id is already registered. Pools are not started.
    #[instrument(skip(self, consumer), fields(queue_id = %consumer.queue_config().location.queue_id()))]
    pub fn register_queue<C: QueueConsumer>(&self, consumer: Arc<C>) -> Result<bool, ServiceError> {
        let config = consumer.queue_config();
        let queue_id = config.location.queue_id().clone();

        let mut queues = self.queues.write();
        if queues.contains_key(&queue_id) {
            warn!("Queue already registered");
            return Ok(false);
        }

        let mut pools = BTreeMap::new();
        for (shard_id, shard) in &self.shards {
            let runner = ConsumerQueueRunner::new(
                Arc::clone(&consumer),
                shard.clone(),
                Arc::clone(&self.task_listener),
            )?;
            let poller = Arc::new(QueueTaskPoller::new(
                Arc::new(runner),
                shard_id.clone(),
                config.location.clone(),
                Arc::clone(&config.settings.poll),
                Arc::clone(&self.thread_listener),
            ));
            let pool = ExecutionPool::new(
                queue_id.clone(),
                shard_id.clone(),
                poller,
                Arc::clone(&config.settings.processing),
            );
            pools.insert(shard_id.clone(), pool);
        }

        info!(location = %config.location, shards = pools.len(), "Queue registered");
        queues.insert(
            queue_id,
            RegisteredQueue {
                settings: config.settings.clone(),
                pools,
            },
        );
        Ok(true)
    }

    /// Ids of all registered queues
    pub fn queue_ids(&self) -> Vec<QueueId> {
        let mut ids: Vec<_> = self.queues.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn pools_of(&self, queue_id: &QueueId) -> Result<Vec<Arc<ExecutionPool>>, ServiceError> {
        self.queues
            .read()
            .get(queue_id)
            .map(|queue| queue.pools.values().cloned().collect())
            .ok_or_else(|| ServiceError::QueueNotRegistered(queue_id.clone()))
    }

    fn all_pools(&self) -> Vec<(QueueId, Vec<Arc<ExecutionPool>>)> {
        let mut all: Vec<_> = self
            .queues
            .read()
            .iter()
            .map(|(id, queue)| (id.clone(), queue.pools.values().cloned().collect()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Start the workers of one queue on every shard
    pub fn start(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        self.pools_of(queue_id)?.iter().for_each(|pool| pool.start());
        Ok(())
    }

    pub fn pause(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        self.pools_of(queue_id)?.iter().for_each(|pool| pool.pause());
        Ok(())
    }

    pub fn unpause(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        self.pools_of(queue_id)?.iter().for_each(|pool| pool.unpause());
        Ok(())
    }

    /// Stop the workers of one queue; see [`await_termination`](Self::await_termination)
    pub fn shutdown(&self, queue_id: &QueueId) -> Result<(), ServiceError> {
        self.pools_of(queue_id)?.iter().for_each(|pool| pool.shutdown());
        Ok(())
    }

    pub fn is_shutdown(&self, queue_id: &QueueId) -> Result<bool, ServiceError> {
        Ok(self.pools_of(queue_id)?.iter().all(|pool| pool.is_shutdown()))
    }

    pub fn is_terminated(&self, queue_id: &QueueId) -> Result<bool, ServiceError> {
        Ok(self.pools_of(queue_id)?.iter().all(|pool| pool.is_terminated()))
    }

    pub fn is_paused(&self, queue_id: &QueueId) -> Result<bool, ServiceError> {
        Ok(self.pools_of(queue_id)?.iter().all(|pool| pool.is_paused()))
    }

    /// Wait up to `timeout` in total for every shard of a queue to terminate
    ///
    /// Returns the shards still running when the budget ran out.
    pub async fn await_termination(
        &self,
        queue_id: &QueueId,
        timeout: Duration,
    ) -> Result<Vec<QueueShardId>, ServiceError> {
        let pools = self.pools_of(queue_id)?;
        let mut limiter = TimeLimiter::new(timeout);
        Ok(await_pools(&pools, &mut limiter)
            .await
            .into_iter()
            .map(|pool| pool.shard_id().clone())
            .collect())
    }

    pub fn start_all(&self) {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .for_each(|pool| pool.start());
    }

    pub fn pause_all(&self) {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .for_each(|pool| pool.pause());
    }

    pub fn unpause_all(&self) {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .for_each(|pool| pool.unpause());
    }

    pub fn shutdown_all(&self) {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .for_each(|pool| pool.shutdown());
    }

    pub fn is_shutdown_all(&self) -> bool {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .all(|pool| pool.is_shutdown())
    }

    pub fn is_terminated_all(&self) -> bool {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .all(|pool| pool.is_terminated())
    }

    pub fn is_paused_all(&self) -> bool {
        self.all_pools()
            .iter()
            .flat_map(|(_, pools)| pools)
            .all(|pool| pool.is_paused())
    }

    /// Wait up to `timeout` in total for every queue to terminate
    ///
    /// Returns the queues with at least one shard still running.
    pub async fn await_termination_all(&self, timeout: Duration) -> Vec<QueueId> {
        let mut limiter = TimeLimiter::new(timeout);
        let mut pending = Vec::new();
        for (queue_id, pools) in self.all_pools() {
            if !await_pools(&pools, &mut limiter).await.is_empty() {
                pending.push(queue_id);
            }
        }
        pending
    }

    /// End the no-task wait of one queue's workers on one shard
    pub fn wakeup(&self, queue_id: &QueueId, shard_id: &QueueShardId) -> Result<(), ServiceError> {
        let queues = self.queues.read();
        let queue = queues
            .get(queue_id)
            .ok_or_else(|| ServiceError::QueueNotRegistered(queue_id.clone()))?;
        let pool = queue
            .pools
            .get(shard_id)
            .ok_or_else(|| ServiceError::ShardNotFound(shard_id.clone()))?;
        pool.wakeup();
        Ok(())
    }

    /// Apply reloaded settings to registered queues
    ///
    /// Returns, per queue with changes, the comma-joined diffs of its
    /// settings groups. Fails without touching anything when any config
    /// names an unregistered queue. The processing mode of a registered
    /// queue is fixed; a different mode in `configs` is ignored.
    #[instrument(skip_all, fields(queues = configs.len()))]
    pub fn update_queue_configs(
        &self,
        configs: Vec<QueueConfig>,
    ) -> Result<BTreeMap<QueueId, String>, ServiceError> {
        let queues = self.queues.read();
        if let Some(unknown) = configs
            .iter()
            .map(|config| config.location.queue_id())
            .find(|queue_id| !queues.contains_key(*queue_id))
        {
            return Err(ServiceError::QueueNotRegistered(unknown.clone()));
        }

        let mut diffs = BTreeMap::new();
        for config in configs {
            let queue_id = config.location.queue_id();
            let Some(queue) = queues.get(queue_id) else {
                continue;
            };
            let diff = apply_settings(queue_id, &queue.settings, &config.settings);
            if !diff.is_empty() {
                info!(queue_id = %queue_id, diff = %diff, "Queue settings updated");
                diffs.insert(queue_id.clone(), diff);
            }
        }
        Ok(diffs)
    }
}

impl Drop for QueueService {
    fn drop(&mut self) {
        for queue in self.queues.get_mut().values() {
            for pool in queue.pools.values() {
                pool.shutdown();
            }
        }
    }
}

/// Await pools one after another within the limiter's budget, returning the
/// ones that did not terminate
async fn await_pools(
    pools: &[Arc<ExecutionPool>],
    limiter: &mut TimeLimiter,
) -> Vec<Arc<ExecutionPool>> {
    let mut pending = Vec::new();
    for pool in pools {
        let terminated = limiter
            .execute(|remaining| pool.await_termination(remaining))
            .await
            .unwrap_or(false);
        if !terminated && !pool.is_terminated() {
            pending.push(Arc::clone(pool));
        }
    }
    pending
}

fn apply_settings(queue_id: &QueueId, live: &QueueSettings, reloaded: &QueueSettings) -> String {
    let mut processing = (*reloaded.processing.get()).clone();
    let mode = live.processing.get().processing_mode;
    if processing.processing_mode != mode {
        warn!(
            queue_id = %queue_id,
            live = %mode,
            requested = %processing.processing_mode,
            "Processing mode cannot change at runtime; keeping the live mode"
        );
        processing = ProcessingSettings {
            processing_mode: mode,
            ..processing
        };
    }

    [
        live.processing.set_value(processing),
        live.poll.set_value((*reloaded.poll.get()).clone()),
        live.failure.set_value((*reloaded.failure.get()).clone()),
        live.reenqueue.set_value((*reloaded.reenqueue.get()).clone()),
        live.ext.set_value((*reloaded.ext.get()).clone()),
    ]
    .into_iter()
    .filter(|diff| !diff.is_empty())
    .collect::<Vec<_>>()
    .join(",")
}
