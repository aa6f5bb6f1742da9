//! Producer-side contracts

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::task::{EnqueueParams, EnqueueResult};
use super::transformer::{PayloadTransformer, TransformError};
use crate::persistence::{EnqueueRecord, QueueShard, StoreError};
use crate::settings::QueueLocation;

/// Producer errors
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("payload error: {0}")]
    Payload(#[from] TransformError),
}

/// Puts tasks into a queue
#[async_trait]
pub trait QueueProducer<T: Send + 'static>: Send + Sync {
    async fn enqueue(&self, params: EnqueueParams<T>) -> Result<EnqueueResult, ProducerError>;
}

/// Chooses the shard a new task is written to
pub trait QueueShardRouter<T>: Send + Sync {
    fn resolve_shard(&self, params: &EnqueueParams<T>) -> QueueShard;
}

/// Routes every task to one shard
#[derive(Debug, Clone)]
pub struct SingleQueueShardRouter {
    shard: QueueShard,
}

impl SingleQueueShardRouter {
    pub fn new(shard: QueueShard) -> Self {
        Self { shard }
    }
}

impl<T> QueueShardRouter<T> for SingleQueueShardRouter {
    fn resolve_shard(&self, _params: &EnqueueParams<T>) -> QueueShard {
        self.shard.clone()
    }
}

/// Serializes the payload, picks a shard and inserts the row in its own
/// transaction
///
/// # Example
///
/// ```ignore
/// let producer = ShardingQueueProducer::new(
///     config.location.clone(),
///     Arc::new(JsonPayloadTransformer::<Email>::new()),
///     Arc::new(SingleQueueShardRouter::new(shard)),
/// );
/// producer.enqueue(EnqueueParams::new(email).with_execution_delay(Duration::from_secs(30))).await?;
/// ```
pub struct ShardingQueueProducer<T> {
    location: QueueLocation,
    transformer: Arc<dyn PayloadTransformer<T>>,
    router: Arc<dyn QueueShardRouter<T>>,
}

impl<T> ShardingQueueProducer<T> {
    pub fn new(
        location: QueueLocation,
        transformer: Arc<dyn PayloadTransformer<T>>,
        router: Arc<dyn QueueShardRouter<T>>,
    ) -> Self {
        Self {
            location,
            transformer,
            router,
        }
    }

    pub fn location(&self) -> &QueueLocation {
        &self.location
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> QueueProducer<T> for ShardingQueueProducer<T> {
    #[instrument(skip(self, params), fields(queue_id = %self.location.queue_id()))]
    async fn enqueue(&self, params: EnqueueParams<T>) -> Result<EnqueueResult, ProducerError> {
        let payload = self.transformer.from_object(params.payload.as_ref())?;
        let shard = self.router.resolve_shard(&params);

        let mut tx = shard.begin().await?;
        let enqueue_id = tx
            .enqueue(
                &self.location,
                EnqueueRecord {
                    payload,
                    execution_delay: params.execution_delay,
                    extra: params.extra,
                },
            )
            .await?;
        tx.commit().await?;

        debug!(shard_id = %shard.shard_id(), enqueue_id, "Task enqueued");
        Ok(EnqueueResult {
            shard_id: shard.shard_id().clone(),
            enqueue_id,
        })
    }
}
