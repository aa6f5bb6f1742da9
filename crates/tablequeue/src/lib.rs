//! # Table-backed task queue
//!
//! A task-queue engine that uses one relational table per queue as the
//! durable store. Workers poll the table, hand each task to application code
//! and delete, postpone or leave the row depending on the result.
//!
//! ## Features
//!
//! - **Per-queue worker pools**: one pool per (queue, shard), resizable at runtime
//! - **Paced polling**: separate waits after a processed task, an empty pick and a crash
//! - **Re-enqueue strategies**: manual, fixed, sequential, arithmetic and geometric delays
//! - **Hot reload**: settings live in observable cells; a reload applies diffs without a restart
//! - **Three processing modes**: separate transactions, one wrapping transaction, or an external executor
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       QueueService                           │
//! │  (queue id → shard id → pool, lifecycle and config updates) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionPool                           │
//! │  (N workers, each a PollLoop around a QueueTaskPoller)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConsumerQueueRunner                         │
//! │  (pick → QueueConsumer::execute → delete / reenqueue)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        QueueDao                              │
//! │  (PostgreSQL: FOR UPDATE SKIP LOCKED, or in memory)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use tablequeue::prelude::*;
//!
//! struct EmailConsumer {
//!     config: QueueConfig,
//!     transformer: JsonPayloadTransformer<Email>,
//! }
//!
//! #[async_trait]
//! impl QueueConsumer for EmailConsumer {
//!     type Payload = Email;
//!
//!     fn queue_config(&self) -> &QueueConfig {
//!         &self.config
//!     }
//!
//!     fn payload_transformer(&self) -> &dyn PayloadTransformer<Email> {
//!         &self.transformer
//!     }
//!
//!     async fn execute(&self, task: Task<Email>) -> anyhow::Result<TaskExecutionResult> {
//!         send(task.payload.context("empty payload")?).await?;
//!         Ok(TaskExecutionResult::finish())
//!     }
//! }
//!
//! let configs = QueueConfigsReader::new(vec!["queues.properties".into()]).read()?;
//! let shard = QueueShard::new("main".into(), Arc::new(PostgresQueueDao::new(pool)));
//! let service = QueueService::new(vec![shard]);
//! for config in configs {
//!     service.register_queue(Arc::new(EmailConsumer::new(config)))?;
//! }
//! service.start_all();
//! ```

pub mod api;
pub mod config;
pub mod listener;
pub mod persistence;
pub mod reliability;
pub mod service;
pub mod settings;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::api::{
        EnqueueParams, EnqueueResult, JsonPayloadTransformer, PayloadTransformer, QueueConsumer,
        QueueProducer, ShardingQueueProducer, SingleQueueShardRouter, StringPayloadTransformer,
        Task, TaskExecutionResult,
    };
    pub use crate::config::{QueueConfigsReader, QueueConfigsReloader};
    pub use crate::persistence::{
        InMemoryQueueDao, PostgresQueueDao, QueueShard, QueueShardId, StoreError,
    };
    pub use crate::service::{QueueService, ServiceError};
    pub use crate::settings::{QueueConfig, QueueId, QueueLocation, QueueSettings};
}

// Re-export key types at crate root
pub use api::{
    EnqueueParams, EnqueueResult, JsonPayloadTransformer, PayloadTransformer, ProducerError,
    QueueConsumer, QueueProducer, QueueShardRouter, ShardingQueueProducer,
    SingleQueueShardRouter, StringPayloadTransformer, Task, TaskExecutionResult, TaskExecutor,
    TaskRecord, TransformError,
};
pub use config::{ConfigError, QueueConfigsReader, QueueConfigsReloader, ReloadError};
pub use listener::{
    CompositeTaskLifecycleListener, CompositeThreadLifecycleListener,
    LoggingTaskLifecycleListener, LoggingThreadLifecycleListener, TaskLifecycleListener,
    ThreadLifecycleListener,
};
pub use persistence::{
    InMemoryQueueDao, PostgresQueueDao, QueueDao, QueueShard, QueueShardId, QueueTableSchema,
    ShardTransaction, StoreError,
};
pub use reliability::{ReenqueueRetryStrategy, RetryError, TimeLimiter};
pub use service::{QueueService, ServiceError};
pub use settings::{
    DynamicSetting, ExtSettings, FailureRetryType, FailureSettings, PollSettings, ProcessingMode,
    ProcessingSettings, QueueConfig, QueueId, QueueLocation, QueueSettings, ReenqueueRetryType,
    ReenqueueSettings, SettingError,
};
pub use worker::{ExecutionPool, ProcessingError, RunnerError};
