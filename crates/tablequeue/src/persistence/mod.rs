//! Persistence layer for queue tables
//!
//! This module provides:
//! - [`QueueDao`] / [`ShardTransaction`] - data access contracts
//! - [`InMemoryQueueDao`] for testing
//! - [`PostgresQueueDao`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryQueueDao;
pub use postgres::PostgresQueueDao;
pub use store::{
    EnqueueRecord, QueueDao, QueueShard, QueueShardId, QueueTableSchema, ShardTransaction,
    StoreError,
};
