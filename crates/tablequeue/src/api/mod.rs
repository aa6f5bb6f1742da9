//! Consumer and producer API
//!
//! - [`QueueConsumer`] - application code processing tasks
//! - [`QueueProducer`] - puts tasks into a queue
//! - [`PayloadTransformer`] - row payload <-> typed payload
//! - [`TaskExecutionResult`] - what to do with a processed task

mod consumer;
mod producer;
mod task;
mod transformer;

pub use consumer::{QueueConsumer, TaskExecutor};
pub use producer::{
    ProducerError, QueueProducer, QueueShardRouter, ShardingQueueProducer, SingleQueueShardRouter,
};
pub use task::{EnqueueParams, EnqueueResult, Task, TaskExecutionResult, TaskRecord};
pub use transformer::{
    JsonPayloadTransformer, PayloadTransformer, StringPayloadTransformer, TransformError,
};
