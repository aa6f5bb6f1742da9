//! Applies a consumer's verdict to the task row

use std::sync::Arc;

use tracing::debug;

use super::ProcessingError;
use crate::api::{TaskExecutionResult, TaskRecord};
use crate::persistence::ShardTransaction;
use crate::reliability::ReenqueueRetryStrategy;
use crate::settings::{DynamicSetting, QueueLocation, ReenqueueSettings};

/// Maps [`TaskExecutionResult`] to row changes
///
/// | result                    | row change                               |
/// |---------------------------|------------------------------------------|
/// | `Finish`                  | deleted                                  |
/// | `Reenqueue` with delay    | postponed by the delay                   |
/// | `Reenqueue` without delay | postponed by the queue's retry strategy  |
/// | `Fail`                    | untouched; the pick already postponed it |
pub struct TaskResultHandler {
    location: QueueLocation,
    reenqueue: Arc<DynamicSetting<ReenqueueSettings>>,
}

impl TaskResultHandler {
    pub fn new(location: QueueLocation, reenqueue: Arc<DynamicSetting<ReenqueueSettings>>) -> Self {
        Self {
            location,
            reenqueue,
        }
    }

    pub async fn handle_result(
        &self,
        tx: &mut dyn ShardTransaction,
        record: &TaskRecord,
        result: TaskExecutionResult,
    ) -> Result<(), ProcessingError> {
        match result {
            TaskExecutionResult::Finish => {
                if !tx.delete_task(&self.location, record.id).await? {
                    debug!(task_id = record.id, "finished task was already gone");
                }
            }
            TaskExecutionResult::Reenqueue { delay } => {
                let delay = match delay {
                    Some(delay) => delay,
                    None => {
                        let strategy = ReenqueueRetryStrategy::from_settings(&self.reenqueue.get())?;
                        strategy.calculate_delay(record.reenqueue_attempts_count)?
                    }
                };
                if !tx.reenqueue(&self.location, record.id, delay).await? {
                    debug!(task_id = record.id, "re-enqueued task was already gone");
                }
            }
            TaskExecutionResult::Fail => {}
        }
        Ok(())
    }
}
