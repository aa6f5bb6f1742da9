//! Queue settings and locations
//!
//! This module provides:
//! - [`DynamicSetting`] - hot-swappable cell with diffing and observers
//! - [`QueueSettings`] - the five settings groups of one queue
//! - [`QueueLocation`] - queue id, table and id sequence, sanitized

mod dynamic;
mod location;
mod queue;

pub use dynamic::{DynamicSetting, ObserverId, SettingError, SettingValue};
pub use location::{sanitize_column_name, sanitize_table_name, QueueId, QueueLocation};
pub use queue::{
    ExtSettings, FailureRetryType, FailureSettings, PollSettings, ProcessingMode,
    ProcessingSettings, QueueConfig, QueueSettings, ReenqueueRetryType, ReenqueueSettings,
};
