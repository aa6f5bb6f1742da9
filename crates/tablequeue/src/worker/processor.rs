//! Runs the consumer on a picked task

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::instrument;

use super::result_handler::TaskResultHandler;
use super::{panic_message, ProcessingError};
use crate::api::{QueueConsumer, Task, TaskExecutionResult, TaskRecord};
use crate::listener::TaskLifecycleListener;
use crate::persistence::{QueueShard, QueueShardId, ShardTransaction};
use crate::settings::QueueLocation;

/// Decodes the payload, invokes the consumer and applies its result
///
/// Failures never escape: they are reported through
/// [`TaskLifecycleListener::crashed`] and the row is left for the failure
/// policy to reschedule. `finished` is emitted for every task.
pub struct TaskProcessor<C: QueueConsumer> {
    consumer: Arc<C>,
    shard_id: QueueShardId,
    location: QueueLocation,
    result_handler: TaskResultHandler,
    listener: Arc<dyn TaskLifecycleListener>,
}

impl<C: QueueConsumer> TaskProcessor<C> {
    pub fn new(
        consumer: Arc<C>,
        shard_id: QueueShardId,
        result_handler: TaskResultHandler,
        listener: Arc<dyn TaskLifecycleListener>,
    ) -> Self {
        let location = consumer.queue_config().location.clone();
        Self {
            consumer,
            shard_id,
            location,
            result_handler,
            listener,
        }
    }

    /// Process a task, applying its result in `tx`
    #[instrument(skip_all, fields(queue_id = %self.location.queue_id(), task_id = record.id))]
    pub async fn process(&self, tx: &mut dyn ShardTransaction, record: TaskRecord) {
        let outcome = match self.execute(&record).await {
            Ok(result) => self.result_handler.handle_result(tx, &record, result).await,
            Err(err) => Err(err),
        };
        self.report(&record, outcome);
    }

    /// Process a task, applying its result in a transaction opened only once
    /// the consumer has returned
    ///
    /// No connection is held while the consumer runs. A `Fail` result needs
    /// no transaction at all.
    #[instrument(skip_all, fields(queue_id = %self.location.queue_id(), task_id = record.id))]
    pub async fn process_detached(&self, shard: &QueueShard, record: TaskRecord) {
        let outcome = match self.execute(&record).await {
            Ok(result) => self.apply_in_new_transaction(shard, &record, result).await,
            Err(err) => Err(err),
        };
        self.report(&record, outcome);
    }

    async fn apply_in_new_transaction(
        &self,
        shard: &QueueShard,
        record: &TaskRecord,
        result: TaskExecutionResult,
    ) -> Result<(), ProcessingError> {
        if result == TaskExecutionResult::Fail {
            return Ok(());
        }
        let mut tx = shard.begin().await?;
        self.result_handler
            .handle_result(tx.as_mut(), record, result)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    fn report(&self, record: &TaskRecord, outcome: Result<(), ProcessingError>) {
        if let Err(err) = outcome {
            self.listener
                .crashed(&self.shard_id, &self.location, record, &err);
        }
        self.listener
            .finished(&self.shard_id, &self.location, record);
    }

    /// Decode and run the consumer, emitting `started` and `executed`
    async fn execute(&self, record: &TaskRecord) -> Result<TaskExecutionResult, ProcessingError> {
        let payload = self
            .consumer
            .payload_transformer()
            .to_object(record.payload.as_deref())?;
        let task = Task::from_record(self.shard_id.clone(), record, payload);

        self.listener
            .started(&self.shard_id, &self.location, record);
        let started = Instant::now();

        let result = match AssertUnwindSafe(self.consumer.execute(task))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => return Err(ProcessingError::Consumer(err)),
            Err(panic) => return Err(ProcessingError::Panicked(panic_message(panic))),
        };

        self.listener.executed(
            &self.shard_id,
            &self.location,
            record,
            &result,
            started.elapsed(),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PayloadTransformer, StringPayloadTransformer};
    use crate::settings::{QueueConfig, QueueId, QueueSettings, ReenqueueSettings};
    use crate::worker::testing::{test_record, Call, EventRecorder, RecordingTransaction};
    use async_trait::async_trait;
    use std::time::Duration;

    enum Behavior {
        Return(TaskExecutionResult),
        Error,
        Panic,
    }

    struct ScriptedConsumer {
        config: QueueConfig,
        behavior: Behavior,
    }

    impl ScriptedConsumer {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                config: QueueConfig::new(
                    QueueLocation::new(QueueId::new("scripted"), "queue_tasks"),
                    QueueSettings::default()
                        .with_reenqueue(ReenqueueSettings::fixed(Duration::from_secs(3))),
                ),
                behavior,
            })
        }
    }

    #[async_trait]
    impl QueueConsumer for ScriptedConsumer {
        type Payload = String;

        fn queue_config(&self) -> &QueueConfig {
            &self.config
        }

        fn payload_transformer(&self) -> &dyn PayloadTransformer<String> {
            &StringPayloadTransformer
        }

        async fn execute(&self, _task: Task<String>) -> anyhow::Result<TaskExecutionResult> {
            match &self.behavior {
                Behavior::Return(result) => Ok(*result),
                Behavior::Error => anyhow::bail!("consumer failed"),
                Behavior::Panic => panic!("consumer panicked"),
            }
        }
    }

    fn processor(
        consumer: Arc<ScriptedConsumer>,
        recorder: Arc<EventRecorder>,
    ) -> TaskProcessor<ScriptedConsumer> {
        let settings = consumer.queue_config().settings.clone();
        let location = consumer.queue_config().location.clone();
        TaskProcessor::new(
            consumer,
            QueueShardId::new("main"),
            TaskResultHandler::new(location, settings.reenqueue),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_successful_task_is_deleted() {
        let recorder = Arc::new(EventRecorder::default());
        let processor = processor(
            ScriptedConsumer::new(Behavior::Return(TaskExecutionResult::finish())),
            recorder.clone(),
        );
        let mut tx = RecordingTransaction::default();

        processor.process(&mut tx, test_record(11)).await;

        assert_eq!(tx.calls, vec![Call::Delete(11)]);
        assert_eq!(recorder.events(), vec!["started", "executed", "finished"]);
    }

    #[tokio::test]
    async fn test_reenqueue_uses_queue_strategy() {
        let recorder = Arc::new(EventRecorder::default());
        let processor = processor(
            ScriptedConsumer::new(Behavior::Return(TaskExecutionResult::reenqueue())),
            recorder,
        );
        let mut tx = RecordingTransaction::default();

        processor.process(&mut tx, test_record(11)).await;

        assert_eq!(tx.calls, vec![Call::Reenqueue(11, Duration::from_secs(3))]);
    }

    #[tokio::test]
    async fn test_consumer_error_is_reported_as_crash() {
        let recorder = Arc::new(EventRecorder::default());
        let processor = processor(ScriptedConsumer::new(Behavior::Error), recorder.clone());
        let mut tx = RecordingTransaction::default();

        processor.process(&mut tx, test_record(11)).await;

        assert!(tx.calls.is_empty());
        assert_eq!(recorder.events(), vec!["started", "crashed", "finished"]);
    }

    #[tokio::test]
    async fn test_consumer_panic_is_reported_as_crash() {
        let recorder = Arc::new(EventRecorder::default());
        let processor = processor(ScriptedConsumer::new(Behavior::Panic), recorder.clone());
        let mut tx = RecordingTransaction::default();

        processor.process(&mut tx, test_record(11)).await;

        assert!(tx.calls.is_empty());
        assert_eq!(recorder.events(), vec!["started", "crashed", "finished"]);
    }
}
