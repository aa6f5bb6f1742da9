//! Consumer-side contracts

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::task::{Task, TaskExecutionResult};
use super::transformer::PayloadTransformer;
use crate::settings::QueueConfig;

/// Application code processing the tasks of one queue
///
/// # Example
///
/// ```ignore
/// struct EmailConsumer {
///     config: QueueConfig,
///     transformer: JsonPayloadTransformer<Email>,
/// }
///
/// #[async_trait]
/// impl QueueConsumer for EmailConsumer {
///     type Payload = Email;
///
///     fn queue_config(&self) -> &QueueConfig {
///         &self.config
///     }
///
///     fn payload_transformer(&self) -> &dyn PayloadTransformer<Email> {
///         &self.transformer
///     }
///
///     async fn execute(&self, task: Task<Email>) -> anyhow::Result<TaskExecutionResult> {
///         send(task.payload.context("empty payload")?).await?;
///         Ok(TaskExecutionResult::finish())
///     }
/// }
/// ```
#[async_trait]
pub trait QueueConsumer: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    fn queue_config(&self) -> &QueueConfig;

    fn payload_transformer(&self) -> &dyn PayloadTransformer<Self::Payload>;

    /// Process one task. Errors and panics are reported as crashes and leave
    /// the row in place.
    async fn execute(&self, task: Task<Self::Payload>) -> anyhow::Result<TaskExecutionResult>;

    /// Executor for [`crate::ProcessingMode::UseExternalExecutor`]
    fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        None
    }
}

/// Runs detached processing jobs
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, job: BoxFuture<'static, ()>);
}

impl TaskExecutor for tokio::runtime::Handle {
    fn execute(&self, job: BoxFuture<'static, ()>) {
        self.spawn(job);
    }
}
