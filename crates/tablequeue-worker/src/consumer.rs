//! Consumer used by the standalone worker

use std::sync::Arc;

use async_trait::async_trait;
use tablequeue::{
    PayloadTransformer, ProcessingMode, QueueConfig, QueueConsumer, StringPayloadTransformer,
    Task, TaskExecutionResult, TaskExecutor,
};
use tokio::runtime::Handle;
use tracing::info;

/// Logs each task and finishes it
///
/// Queues in `use-external-executor` mode run their tasks on the worker's
/// tokio runtime.
pub struct LoggingConsumer {
    config: QueueConfig,
    transformer: StringPayloadTransformer,
    runtime: Handle,
}

impl LoggingConsumer {
    pub fn new(config: QueueConfig, runtime: Handle) -> Self {
        Self {
            config,
            transformer: StringPayloadTransformer,
            runtime,
        }
    }
}

#[async_trait]
impl QueueConsumer for LoggingConsumer {
    type Payload = String;

    fn queue_config(&self) -> &QueueConfig {
        &self.config
    }

    fn payload_transformer(&self) -> &dyn PayloadTransformer<String> {
        &self.transformer
    }

    async fn execute(&self, task: Task<String>) -> anyhow::Result<TaskExecutionResult> {
        info!(
            queue_id = %self.config.location.queue_id(),
            shard_id = %task.shard_id,
            attempt = task.attempts_count,
            reenqueue_attempt = task.reenqueue_attempts_count,
            payload_len = task.payload.as_ref().map_or(0, String::len),
            "Task consumed"
        );
        Ok(TaskExecutionResult::finish())
    }

    fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        let mode = self.config.settings.processing.get().processing_mode;
        (mode == ProcessingMode::UseExternalExecutor)
            .then(|| Arc::new(self.runtime.clone()) as Arc<dyn TaskExecutor>)
    }
}
