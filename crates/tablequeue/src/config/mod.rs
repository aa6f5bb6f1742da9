//! Queue configuration
//!
//! - [`QueueConfigsReader`] - layered `.properties` files to [`crate::QueueConfig`]s
//! - [`QueueConfigsReloader`] - re-reads changed files into a running service
//! - [`parse_duration`] - ISO-8601 duration literals

mod duration;
mod reader;
mod reload;

pub use duration::{parse_duration, parse_duration_list, InvalidDuration};
pub use reader::{parse_properties, ConfigError, QueueConfigsReader, DEFAULT_PREFIX};
pub use reload::{QueueConfigsReloader, ReloadError};
