//! Data access contracts

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::TaskRecord;
use crate::settings::{sanitize_column_name, FailureSettings, QueueLocation};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Transaction used after commit or rollback
    #[error("transaction already completed")]
    TransactionCompleted,

    /// Extra column not declared in the table schema
    #[error("unknown extra column: {0}")]
    UnknownColumn(String),
}

/// Identifier of one database endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueShardId(String);

impl QueueShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueShardId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Row to insert on enqueue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueRecord {
    pub payload: Option<String>,
    pub execution_delay: Duration,
    pub extra: BTreeMap<String, String>,
}

/// Column names of a queue table
///
/// All names are sanitized to `[A-Za-z0-9_]` on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTableSchema {
    pub queue_name: String,
    pub payload: String,
    pub created_at: String,
    pub next_process_at: String,
    pub attempt: String,
    pub reenqueue_attempt: String,
    pub total_attempt: String,
    pub extra_fields: Vec<String>,
}

impl Default for QueueTableSchema {
    fn default() -> Self {
        Self {
            queue_name: "queue_name".to_string(),
            payload: "payload".to_string(),
            created_at: "created_at".to_string(),
            next_process_at: "next_process_at".to_string(),
            attempt: "attempt".to_string(),
            reenqueue_attempt: "reenqueue_attempt".to_string(),
            total_attempt: "total_attempt".to_string(),
            extra_fields: Vec::new(),
        }
    }
}

impl QueueTableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an extra column read on pick and writable on enqueue
    pub fn with_extra_field(mut self, column: &str) -> Self {
        self.extra_fields.push(sanitize_column_name(column));
        self
    }

    pub fn with_queue_name(mut self, column: &str) -> Self {
        self.queue_name = sanitize_column_name(column);
        self
    }

    pub fn with_payload(mut self, column: &str) -> Self {
        self.payload = sanitize_column_name(column);
        self
    }

    pub fn with_next_process_at(mut self, column: &str) -> Self {
        self.next_process_at = sanitize_column_name(column);
        self
    }

    /// Sanitized extra column names for an enqueue, rejecting undeclared ones
    pub(crate) fn resolve_extra<'a>(
        &self,
        extra: &'a BTreeMap<String, String>,
    ) -> Result<Vec<(String, &'a str)>, StoreError> {
        extra
            .iter()
            .map(|(column, value)| {
                let column = sanitize_column_name(column);
                if self.extra_fields.contains(&column) {
                    Ok((column, value.as_str()))
                } else {
                    Err(StoreError::UnknownColumn(column))
                }
            })
            .collect()
    }
}

/// Open transaction on one shard
///
/// Dropping a transaction without [`commit`](Self::commit) rolls it back.
#[async_trait]
pub trait ShardTransaction: Send {
    /// Claim the oldest visible row of the queue and push its visibility
    /// forward by the failure delay for its current attempt count.
    async fn pick_task(
        &mut self,
        location: &QueueLocation,
        failure: &FailureSettings,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Insert a row, returning its id
    async fn enqueue(
        &mut self,
        location: &QueueLocation,
        record: EnqueueRecord,
    ) -> Result<i64, StoreError>;

    /// Delete a row. Returns false when it did not exist.
    async fn delete_task(&mut self, location: &QueueLocation, id: i64)
        -> Result<bool, StoreError>;

    /// Postpone a row by `delay`, bumping its re-enqueue counter and resetting
    /// its attempt counter. Returns false when it did not exist.
    async fn reenqueue(
        &mut self,
        location: &QueueLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Data access for one shard
#[async_trait]
pub trait QueueDao: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ShardTransaction>, StoreError>;
}

/// A database endpoint with its data access layer
#[derive(Clone)]
pub struct QueueShard {
    shard_id: QueueShardId,
    dao: Arc<dyn QueueDao>,
}

impl QueueShard {
    pub fn new(shard_id: QueueShardId, dao: Arc<dyn QueueDao>) -> Self {
        Self { shard_id, dao }
    }

    pub fn shard_id(&self) -> &QueueShardId {
        &self.shard_id
    }

    pub fn dao(&self) -> &Arc<dyn QueueDao> {
        &self.dao
    }

    pub async fn begin(&self) -> Result<Box<dyn ShardTransaction>, StoreError> {
        self.dao.begin().await
    }
}

impl fmt::Debug for QueueShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueShard")
            .field("shard_id", &self.shard_id)
            .finish_non_exhaustive()
    }
}
