//! Lifecycle listeners
//!
//! Hooks fired at fixed points of task processing and worker iterations:
//! - [`TaskLifecycleListener`] - picked, started, executed, finished, crashed
//! - [`ThreadLifecycleListener`] - started, executed, finished, crashed
//!
//! Listeners are pure notification; they cannot change the outcome.

mod task;
mod thread;

pub use task::{
    CompositeTaskLifecycleListener, LoggingTaskLifecycleListener, TaskLifecycleListener,
};
pub use thread::{
    CompositeThreadLifecycleListener, LoggingThreadLifecycleListener, ThreadLifecycleListener,
};
