//! Queue workers
//!
//! This module provides:
//! - [`ExecutionPool`] - N workers for one (queue, shard) pair
//! - [`PollLoop`] - pause/wait/wakeup pacing of one worker
//! - [`QueueTaskPoller`] - one iteration plus its wait
//! - [`ConsumerQueueRunner`] - pick and process under a processing mode
//! - [`TaskPicker`], [`TaskProcessor`], [`TaskResultHandler`] - the pipeline stages
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutionPool                            │
//! │   [worker 1] [worker 2] ... [worker N]   (N = thread_count)  │
//! └──────┬──────────────────────────────────────────────────────┘
//!        │ each worker: PollLoop::run
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    QueueTaskPoller                           │
//! │   run_queue ──► wait(no_task | between_task | fatal_crash)   │
//! └──────┬──────────────────────────────────────────────────────┘
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConsumerQueueRunner                         │
//! │   TaskPicker ──► TaskProcessor ──► TaskResultHandler         │
//! │   (pick row)     (consumer)        (delete / reenqueue)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod picker;
mod poll_loop;
mod poller;
mod pool;
mod processor;
mod result_handler;
mod runner;

use std::any::Any;

pub use picker::TaskPicker;
pub use poll_loop::{LoopState, PollLoop, WaitOutcome, WakePolicy};
pub use poller::QueueTaskPoller;
pub use pool::ExecutionPool;
pub use processor::TaskProcessor;
pub use result_handler::TaskResultHandler;
pub use runner::{ConsumerQueueRunner, QueueProcessingStatus, QueueRunner, RunnerError};

use crate::api::TransformError;
use crate::persistence::StoreError;
use crate::reliability::RetryError;
use crate::settings::SettingError;

/// Failure while processing a task or running an iteration
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// Database access failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The payload could not be decoded
    #[error("payload error: {0}")]
    Payload(#[from] TransformError),

    /// The consumer returned an error
    #[error("consumer error: {0:#}")]
    Consumer(anyhow::Error),

    /// No re-enqueue delay could be computed
    #[error("retry error: {0}")]
    Retry(#[from] RetryError),

    /// The queue's settings are unusable
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingError),

    /// The consumer or runner panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
