//! One iteration over a queue: pick a task, then process it
//!
//! The transaction layout is fixed at construction from the queue's
//! processing mode:
//!
//! ```text
//! SeparateTransactions   [begin pick commit] execute [begin apply commit]
//! WrapInTransaction      [begin pick execute apply commit]
//! UseExternalExecutor    [begin pick commit] ──► executor: execute [begin apply commit]
//! ```
//!
//! Outside the wrapping mode the consumer runs with no transaction open; the
//! result is applied in a short transaction afterwards, skipped for `Fail`.
//!
//! With the external executor a worker reports the task as processed as soon
//! as the job is handed off, so one worker may have several tasks in flight.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::picker::TaskPicker;
use super::processor::TaskProcessor;
use super::result_handler::TaskResultHandler;
use super::ProcessingError;
use crate::api::{QueueConsumer, TaskExecutor, TaskRecord};
use crate::listener::TaskLifecycleListener;
use crate::persistence::QueueShard;
use crate::settings::{ProcessingMode, QueueId};

/// What one iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueProcessingStatus {
    /// Nothing was ready
    Skipped,
    /// A task was processed or handed off
    Processed,
}

/// Queue runner construction errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("queue {0} uses the external executor mode but its consumer provides no executor")]
    ExecutorRequired(QueueId),
}

/// A single pick-and-process step
#[async_trait]
pub trait QueueRunner: Send + Sync {
    async fn run_queue(&self) -> Result<QueueProcessingStatus, ProcessingError>;
}

enum Transactions {
    Separate,
    Wrapped,
    External(Arc<dyn TaskExecutor>),
}

/// [`QueueRunner`] driving a [`QueueConsumer`] against one shard
pub struct ConsumerQueueRunner<C: QueueConsumer> {
    shard: QueueShard,
    picker: TaskPicker,
    processor: Arc<TaskProcessor<C>>,
    transactions: Transactions,
}

impl<C: QueueConsumer> ConsumerQueueRunner<C> {
    pub fn new(
        consumer: Arc<C>,
        shard: QueueShard,
        listener: Arc<dyn TaskLifecycleListener>,
    ) -> Result<Self, RunnerError> {
        let location = consumer.queue_config().location.clone();
        let settings = consumer.queue_config().settings.clone();

        let transactions = match settings.processing.get().processing_mode {
            ProcessingMode::SeparateTransactions => Transactions::Separate,
            ProcessingMode::WrapInTransaction => Transactions::Wrapped,
            ProcessingMode::UseExternalExecutor => {
                let executor = consumer
                    .executor()
                    .ok_or_else(|| RunnerError::ExecutorRequired(location.queue_id().clone()))?;
                Transactions::External(executor)
            }
        };

        let picker = TaskPicker::new(
            shard.shard_id().clone(),
            location.clone(),
            Arc::clone(&settings.failure),
            Arc::clone(&listener),
        );
        let processor = Arc::new(TaskProcessor::new(
            consumer,
            shard.shard_id().clone(),
            TaskResultHandler::new(location, Arc::clone(&settings.reenqueue)),
            listener,
        ));

        Ok(Self {
            shard,
            picker,
            processor,
            transactions,
        })
    }

    pub fn processing_mode(&self) -> ProcessingMode {
        match self.transactions {
            Transactions::Separate => ProcessingMode::SeparateTransactions,
            Transactions::Wrapped => ProcessingMode::WrapInTransaction,
            Transactions::External(_) => ProcessingMode::UseExternalExecutor,
        }
    }

    async fn pick_committed(&self) -> Result<Option<TaskRecord>, ProcessingError> {
        let mut tx = self.shard.begin().await?;
        let record = self.picker.pick(tx.as_mut()).await?;
        tx.commit().await?;
        Ok(record)
    }
}

#[async_trait]
impl<C: QueueConsumer> QueueRunner for ConsumerQueueRunner<C> {
    #[instrument(skip(self), fields(shard_id = %self.shard.shard_id()))]
    async fn run_queue(&self) -> Result<QueueProcessingStatus, ProcessingError> {
        match &self.transactions {
            Transactions::Separate => {
                let Some(record) = self.pick_committed().await? else {
                    return Ok(QueueProcessingStatus::Skipped);
                };
                self.processor.process_detached(&self.shard, record).await;
                Ok(QueueProcessingStatus::Processed)
            }
            Transactions::Wrapped => {
                let mut tx = self.shard.begin().await?;
                let Some(record) = self.picker.pick(tx.as_mut()).await? else {
                    tx.commit().await?;
                    return Ok(QueueProcessingStatus::Skipped);
                };
                self.processor.process(tx.as_mut(), record).await;
                tx.commit().await?;
                Ok(QueueProcessingStatus::Processed)
            }
            Transactions::External(executor) => {
                let Some(record) = self.pick_committed().await? else {
                    return Ok(QueueProcessingStatus::Skipped);
                };
                let processor = Arc::clone(&self.processor);
                let shard = self.shard.clone();
                executor.execute(Box::pin(async move {
                    processor.process_detached(&shard, record).await;
                }));
                Ok(QueueProcessingStatus::Processed)
            }
        }
    }
}
