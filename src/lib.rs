//! A bounded, multi-threaded task queue: a fixed pool of worker threads runs
//! submitted closures, outcomes are delivered to registered callbacks, and
//! `await_all` blocks until everything submitted so far has finished.

mod admission;
mod config;
mod dispatcher;
mod error;
mod queue;
mod task;
mod tracker;
mod worker;

pub use config::{QueueConfig, DEFAULT_QUEUE_NAME};
pub use dispatcher::{TaskCompletionInfo, TaskCompletionStatus};
pub use error::{BoxError, QueueError, TaskError};
pub use queue::{ActiveTask, ShutdownMode, SimpleTaskQueue};
pub use task::{TaskId, TaskToExecute};
