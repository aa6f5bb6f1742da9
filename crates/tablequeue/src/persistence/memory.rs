//! In-memory implementation of QueueDao for testing

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::store::*;
use crate::api::TaskRecord;
use crate::settings::{FailureSettings, QueueLocation};

/// Internal row state
#[derive(Debug, Clone)]
struct Row {
    queue_name: String,
    payload: Option<String>,
    attempt: u32,
    reenqueue_attempt: u32,
    total_attempt: u32,
    created_at: DateTime<Utc>,
    next_process_at: DateTime<Utc>,
    extra: BTreeMap<String, Option<String>>,
}

impl Row {
    fn to_record(&self, id: i64) -> TaskRecord {
        TaskRecord {
            id,
            payload: self.payload.clone(),
            attempts_count: self.attempt,
            reenqueue_attempts_count: self.reenqueue_attempt,
            total_attempts_count: self.total_attempt,
            created_at: self.created_at,
            next_process_at: self.next_process_at,
            extra: self.extra.clone(),
        }
    }
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<i64, Row>>,
    next_id: i64,
}

/// In-memory implementation of QueueDao
///
/// This is primarily for testing. It provides the same pick, re-enqueue and
/// delete semantics as the PostgreSQL implementation, without isolation:
/// writes are visible immediately and rollback does not undo them.
///
/// # Example
///
/// ```
/// use tablequeue::InMemoryQueueDao;
///
/// let dao = InMemoryQueueDao::new();
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueueDao {
    schema: QueueTableSchema,
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryQueueDao {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose tables carry extra columns
    pub fn with_schema(schema: QueueTableSchema) -> Self {
        Self {
            schema,
            tables: Arc::default(),
        }
    }

    /// Number of rows of a queue, visible or not
    pub fn task_count(&self, location: &QueueLocation) -> usize {
        let tables = self.tables.lock();
        tables
            .rows
            .get(location.table_name())
            .map(|rows| {
                rows.values()
                    .filter(|row| row.queue_name == location.queue_id().as_str())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Current state of one row
    pub fn get_task(&self, location: &QueueLocation, id: i64) -> Option<TaskRecord> {
        let tables = self.tables.lock();
        tables
            .rows
            .get(location.table_name())?
            .get(&id)
            .filter(|row| row.queue_name == location.queue_id().as_str())
            .map(|row| row.to_record(id))
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.tables.lock().rows.clear();
    }
}

#[async_trait]
impl QueueDao for InMemoryQueueDao {
    async fn begin(&self) -> Result<Box<dyn ShardTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            schema: self.schema.clone(),
            tables: Arc::clone(&self.tables),
            completed: false,
        }))
    }
}

struct InMemoryTransaction {
    schema: QueueTableSchema,
    tables: Arc<Mutex<Tables>>,
    completed: bool,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.completed {
            return Err(StoreError::TransactionCompleted);
        }
        Ok(())
    }
}

fn shift(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl ShardTransaction for InMemoryTransaction {
    async fn pick_task(
        &mut self,
        location: &QueueLocation,
        failure: &FailureSettings,
    ) -> Result<Option<TaskRecord>, StoreError> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let Some(rows) = tables.rows.get_mut(location.table_name()) else {
            return Ok(None);
        };

        let candidate = rows
            .iter()
            .filter(|(_, row)| {
                row.queue_name == location.queue_id().as_str() && row.next_process_at <= now
            })
            .min_by_key(|(id, row)| (row.next_process_at, **id))
            .map(|(id, _)| *id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        row.next_process_at = shift(now, failure.delay_for_attempt(row.attempt));
        row.attempt = row.attempt.saturating_add(1);
        row.total_attempt = row.total_attempt.saturating_add(1);
        Ok(Some(row.to_record(id)))
    }

    async fn enqueue(
        &mut self,
        location: &QueueLocation,
        record: EnqueueRecord,
    ) -> Result<i64, StoreError> {
        self.ensure_open()?;
        let mut extra: BTreeMap<String, Option<String>> = self
            .schema
            .extra_fields
            .iter()
            .map(|column| (column.clone(), None))
            .collect();
        for (column, value) in self.schema.resolve_extra(&record.extra)? {
            extra.insert(column, Some(value.to_string()));
        }

        let now = Utc::now();
        let mut tables = self.tables.lock();
        tables.next_id += 1;
        let id = tables.next_id;
        tables
            .rows
            .entry(location.table_name().to_string())
            .or_default()
            .insert(
                id,
                Row {
                    queue_name: location.queue_id().as_str().to_string(),
                    payload: record.payload,
                    attempt: 0,
                    reenqueue_attempt: 0,
                    total_attempt: 0,
                    created_at: now,
                    next_process_at: shift(now, record.execution_delay),
                    extra,
                },
            );
        Ok(id)
    }

    async fn delete_task(
        &mut self,
        location: &QueueLocation,
        id: i64,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut tables = self.tables.lock();
        let Some(rows) = tables.rows.get_mut(location.table_name()) else {
            return Ok(false);
        };
        match rows.get(&id) {
            Some(row) if row.queue_name == location.queue_id().as_str() => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reenqueue(
        &mut self,
        location: &QueueLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut tables = self.tables.lock();
        let row = tables
            .rows
            .get_mut(location.table_name())
            .and_then(|rows| rows.get_mut(&id))
            .filter(|row| row.queue_name == location.queue_id().as_str());
        let Some(row) = row else {
            return Ok(false);
        };
        row.next_process_at = shift(Utc::now(), delay);
        row.attempt = 0;
        row.reenqueue_attempt = row.reenqueue_attempt.saturating_add(1);
        Ok(true)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.completed = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.completed = true;
        Ok(())
    }
}
