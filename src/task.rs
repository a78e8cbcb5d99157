use crate::error::{BoxError, TaskError};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Process-wide unique identifier handed out when a task is admitted.
pub type TaskId = u64;

/// The type of callable the queue executes: no arguments, one value or a failure.
pub type TaskToExecute<R> = Box<dyn FnOnce() -> Result<R, BoxError> + Send + 'static>;

pub(crate) fn next_task_id() -> TaskId {
  NEXT_TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Internal representation of a task owned by the queue.
pub(crate) struct ManagedTask<R: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) job: TaskToExecute<R>,
}

impl<R: Send + 'static> fmt::Debug for ManagedTask<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedTask")
      .field("task_id", &self.task_id)
      .finish_non_exhaustive()
  }
}

/// What a worker hands to the dispatcher after running a task.
#[derive(Debug)]
pub(crate) enum TaskOutcome<R> {
  Success(R),
  Failure(TaskError),
}
