//! Task records, typed tasks and execution results

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persistence::QueueShardId;

/// Snapshot of one queue row as returned by a pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub payload: Option<String>,
    /// Picks since the last re-enqueue (or since enqueue)
    pub attempts_count: u32,
    /// Re-enqueues since enqueue
    pub reenqueue_attempts_count: u32,
    /// Picks since enqueue, never reset
    pub total_attempts_count: u32,
    pub created_at: DateTime<Utc>,
    pub next_process_at: DateTime<Utc>,
    /// Values of the table's extra columns
    #[serde(default)]
    pub extra: BTreeMap<String, Option<String>>,
}

/// Typed view of a picked row, handed to the consumer
#[derive(Debug, Clone)]
pub struct Task<T> {
    pub shard_id: QueueShardId,
    pub payload: Option<T>,
    pub attempts_count: u32,
    pub reenqueue_attempts_count: u32,
    pub total_attempts_count: u32,
    pub created_at: DateTime<Utc>,
    pub extra: BTreeMap<String, Option<String>>,
}

impl<T> Task<T> {
    pub fn from_record(shard_id: QueueShardId, record: &TaskRecord, payload: Option<T>) -> Self {
        Self {
            shard_id,
            payload,
            attempts_count: record.attempts_count,
            reenqueue_attempts_count: record.reenqueue_attempts_count,
            total_attempts_count: record.total_attempts_count,
            created_at: record.created_at,
            extra: record.extra.clone(),
        }
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    pub fn extra(&self, column: &str) -> Option<&str> {
        self.extra.get(column).and_then(|v| v.as_deref())
    }
}

/// What the consumer wants done with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskExecutionResult {
    /// Delete the row
    Finish,
    /// Postpone the row; `None` asks the configured strategy for the delay
    Reenqueue { delay: Option<Duration> },
    /// Leave the row; the pick-time failure delay decides when it is retried
    Fail,
}

impl TaskExecutionResult {
    pub fn finish() -> Self {
        Self::Finish
    }

    pub fn fail() -> Self {
        Self::Fail
    }

    pub fn reenqueue() -> Self {
        Self::Reenqueue { delay: None }
    }

    pub fn reenqueue_with_delay(delay: Duration) -> Self {
        Self::Reenqueue { delay: Some(delay) }
    }
}

/// Producer input
#[derive(Debug, Clone)]
pub struct EnqueueParams<T> {
    pub payload: Option<T>,
    pub execution_delay: Duration,
    pub extra: BTreeMap<String, String>,
}

impl<T> Default for EnqueueParams<T> {
    fn default() -> Self {
        Self {
            payload: None,
            execution_delay: Duration::ZERO,
            extra: BTreeMap::new(),
        }
    }
}

impl<T> EnqueueParams<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload: Some(payload),
            ..Default::default()
        }
    }

    /// Delay before the task becomes visible to workers
    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Value for an extra table column
    pub fn with_extra(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(column.into(), value.into());
        self
    }
}

/// Producer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueResult {
    pub shard_id: QueueShardId,
    pub enqueue_id: i64,
}
