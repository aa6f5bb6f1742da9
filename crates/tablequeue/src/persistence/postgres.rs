//! PostgreSQL implementation of QueueDao
//!
//! Production-ready persistence using PostgreSQL with:
//! - Efficient row claiming with SKIP LOCKED
//! - Visibility timestamps instead of claim status columns
//! - Configurable column names for existing tables

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::api::TaskRecord;
use crate::settings::{FailureRetryType, FailureSettings, QueueLocation};

/// PostgreSQL implementation of QueueDao
///
/// Uses a connection pool for efficient database access. Every queue table
/// needs an `id BIGINT` primary key (serial or fed from the configured id
/// sequence) plus the columns named by [`QueueTableSchema`]. Extra columns are
/// read and written as text.
///
/// # Example
///
/// ```ignore
/// use tablequeue::PostgresQueueDao;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let dao = PostgresQueueDao::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresQueueDao {
    pool: PgPool,
    schema: QueueTableSchema,
}

impl PostgresQueueDao {
    /// Create a new PostgreSQL data access layer with the default column names
    pub fn new(pool: PgPool) -> Self {
        Self::with_schema(pool, QueueTableSchema::default())
    }

    pub fn with_schema(pool: PgPool, schema: QueueTableSchema) -> Self {
        Self { pool, schema }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations (creates the default `queue_tasks` table)
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }
}

#[async_trait]
impl QueueDao for PostgresQueueDao {
    async fn begin(&self) -> Result<Box<dyn ShardTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })?;
        Ok(Box::new(PostgresTransaction {
            tx: Some(tx),
            schema: self.schema.clone(),
        }))
    }
}

struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    schema: QueueTableSchema,
}

impl PostgresTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or(StoreError::TransactionCompleted)
    }

    fn returning_columns(&self) -> String {
        let s = &self.schema;
        let mut columns = format!(
            "q.id, q.{}, q.{}, q.{}, q.{}, q.{}, q.{}",
            s.payload, s.attempt, s.reenqueue_attempt, s.total_attempt, s.created_at,
            s.next_process_at
        );
        for field in &s.extra_fields {
            columns.push_str(&format!(", q.{field}"));
        }
        columns
    }

    fn read_record(&self, row: &PgRow) -> Result<TaskRecord, StoreError> {
        let s = &self.schema;
        let get_count = |column: &str| -> Result<u32, StoreError> {
            row.try_get::<i32, _>(column)
                .map(|v| v.max(0) as u32)
                .map_err(|e| StoreError::Database(e.to_string()))
        };

        let mut extra = std::collections::BTreeMap::new();
        for field in &s.extra_fields {
            let value: Option<String> = row
                .try_get(field.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?;
            extra.insert(field.clone(), value);
        }

        Ok(TaskRecord {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::Database(e.to_string()))?,
            payload: row
                .try_get(s.payload.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?,
            attempts_count: get_count(&s.attempt)?,
            reenqueue_attempts_count: get_count(&s.reenqueue_attempt)?,
            total_attempts_count: get_count(&s.total_attempt)?,
            created_at: row
                .try_get::<DateTime<Utc>, _>(s.created_at.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?,
            next_process_at: row
                .try_get::<DateTime<Utc>, _>(s.next_process_at.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?,
            extra,
        })
    }
}

/// Interval expression for the failure delay, in terms of the row's current attempt
///
/// The geometric multiplier saturates at `u32::MAX` like
/// [`FailureSettings::delay_for_attempt`].
fn failure_delay_sql(retry_type: FailureRetryType, attempt_column: &str) -> String {
    match retry_type {
        FailureRetryType::LinearBackoff => "$2::float8 * interval '1 millisecond'".to_string(),
        FailureRetryType::ArithmeticBackoff => format!(
            "(1 + 2 * q.{attempt_column}) * $2::float8 * interval '1 millisecond'"
        ),
        FailureRetryType::GeometricBackoff => format!(
            "LEAST(power(2::float8, LEAST(q.{attempt_column}, 32)), 4294967295) \
             * $2::float8 * interval '1 millisecond'"
        ),
    }
}

fn millis(delay: Duration) -> f64 {
    delay.as_secs_f64() * 1000.0
}

#[async_trait]
impl ShardTransaction for PostgresTransaction {
    #[instrument(skip(self, location, failure), fields(queue_id = %location.queue_id()))]
    async fn pick_task(
        &mut self,
        location: &QueueLocation,
        failure: &FailureSettings,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let s = &self.schema;
        // Claims the oldest visible row; SKIP LOCKED keeps concurrent workers
        // from blocking on each other. Visibility moves forward by the failure
        // delay so an unfinished row comes back on its own.
        let sql = format!(
            r#"
            WITH picked AS (
                SELECT id
                FROM {table}
                WHERE {queue_name} = $1
                  AND {next_process_at} <= now()
                ORDER BY {next_process_at}, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table} q
            SET {next_process_at} = now() + {delay},
                {attempt} = q.{attempt} + 1,
                {total_attempt} = q.{total_attempt} + 1
            FROM picked p
            WHERE q.id = p.id
            RETURNING {returning}
            "#,
            table = location.table_name(),
            queue_name = s.queue_name,
            next_process_at = s.next_process_at,
            attempt = s.attempt,
            total_attempt = s.total_attempt,
            delay = failure_delay_sql(failure.retry_type, &s.attempt),
            returning = self.returning_columns(),
        );

        let queue_id = location.queue_id().as_str().to_string();
        let row = sqlx::query(&sql)
            .bind(queue_id)
            .bind(millis(failure.retry_interval))
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| {
                error!("Failed to pick task: {}", e);
                StoreError::Database(e.to_string())
            })?;

        match row {
            Some(row) => {
                let record = self.read_record(&row)?;
                debug!(task_id = record.id, attempt = record.attempts_count, "picked task");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, location, record), fields(queue_id = %location.queue_id()))]
    async fn enqueue(
        &mut self,
        location: &QueueLocation,
        record: EnqueueRecord,
    ) -> Result<i64, StoreError> {
        let s = &self.schema;
        let extra = s.resolve_extra(&record.extra)?;

        let mut columns = vec![
            s.queue_name.clone(),
            s.payload.clone(),
            s.created_at.clone(),
            s.next_process_at.clone(),
            s.attempt.clone(),
            s.reenqueue_attempt.clone(),
            s.total_attempt.clone(),
        ];
        let mut values = vec![
            "$1".to_string(),
            "$2".to_string(),
            "now()".to_string(),
            "now() + $3::float8 * interval '1 millisecond'".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
        ];
        if let Some(sequence) = location.id_sequence() {
            columns.insert(0, "id".to_string());
            values.insert(0, format!("nextval('{sequence}')"));
        }
        for (index, (column, _)) in extra.iter().enumerate() {
            columns.push(column.clone());
            values.push(format!("${}", index + 4));
        }

        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES ({values}) RETURNING id",
            table = location.table_name(),
            columns = columns.join(", "),
            values = values.join(", "),
        );

        let mut query = sqlx::query(&sql)
            .bind(location.queue_id().as_str().to_string())
            .bind(record.payload)
            .bind(millis(record.execution_delay));
        for (_, value) in &extra {
            query = query.bind(value.to_string());
        }

        let row = query.fetch_one(self.conn()?).await.map_err(|e| {
            error!("Failed to enqueue task: {}", e);
            StoreError::Database(e.to_string())
        })?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(task_id = id, "enqueued task");
        Ok(id)
    }

    #[instrument(skip(self, location), fields(queue_id = %location.queue_id()))]
    async fn delete_task(
        &mut self,
        location: &QueueLocation,
        id: i64,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "DELETE FROM {table} WHERE {queue_name} = $1 AND id = $2",
            table = location.table_name(),
            queue_name = self.schema.queue_name,
        );
        let result = sqlx::query(&sql)
            .bind(location.queue_id().as_str().to_string())
            .bind(id)
            .execute(self.conn()?)
            .await
            .map_err(|e| {
                error!("Failed to delete task: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, location), fields(queue_id = %location.queue_id()))]
    async fn reenqueue(
        &mut self,
        location: &QueueLocation,
        id: i64,
        delay: Duration,
    ) -> Result<bool, StoreError> {
        let s = &self.schema;
        let sql = format!(
            r#"
            UPDATE {table}
            SET {next_process_at} = now() + $3::float8 * interval '1 millisecond',
                {attempt} = 0,
                {reenqueue_attempt} = {reenqueue_attempt} + 1
            WHERE {queue_name} = $1 AND id = $2
            "#,
            table = location.table_name(),
            next_process_at = s.next_process_at,
            attempt = s.attempt,
            reenqueue_attempt = s.reenqueue_attempt,
            queue_name = s.queue_name,
        );
        let result = sqlx::query(&sql)
            .bind(location.queue_id().as_str().to_string())
            .bind(id)
            .bind(millis(delay))
            .execute(self.conn()?)
            .await
            .map_err(|e| {
                error!("Failed to reenqueue task: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionCompleted)?;
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            StoreError::Database(e.to_string())
        })
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionCompleted)?;
        tx.rollback()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_delay_sql_uses_old_attempt() {
        assert_eq!(
            failure_delay_sql(FailureRetryType::LinearBackoff, "attempt"),
            "$2::float8 * interval '1 millisecond'"
        );
        assert!(failure_delay_sql(FailureRetryType::GeometricBackoff, "attempt")
            .starts_with("LEAST(power(2::float8, LEAST(q.attempt, 32)), 4294967295)"));
        assert!(failure_delay_sql(FailureRetryType::ArithmeticBackoff, "tries")
            .starts_with("(1 + 2 * q.tries)"));
    }

    #[test]
    fn test_millis_keeps_fraction() {
        assert_eq!(millis(Duration::from_micros(1500)), 1.5);
        assert_eq!(millis(Duration::from_secs(2)), 2000.0);
    }
}
