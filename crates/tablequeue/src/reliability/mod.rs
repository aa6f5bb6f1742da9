//! Reliability patterns for queue processing
//!
//! This module provides:
//! - [`ReenqueueRetryStrategy`] - attempt number to re-enqueue delay
//! - [`TimeLimiter`] - one timeout budget across several waits

mod retry;
mod time_limiter;

pub use retry::{ReenqueueRetryStrategy, RetryError};
pub use time_limiter::TimeLimiter;
