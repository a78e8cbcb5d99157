use crate::task::TaskId;

use thiserror::Error;

/// The failure type a task body returns.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the queue itself (construction and admission).
///
/// Nothing about an individual task's outcome is ever reported through this
/// type; task outcomes reach the registered callbacks only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
  #[error("Invalid queue configuration: {0}")]
  InvalidConfiguration(String),

  #[error("Queue is closed or shut down, cannot accept new tasks")]
  QueueClosed,

  #[error("Queue was shut down while the caller was blocked")]
  ShutdownInterrupted,

  #[error("Timed out waiting on the queue")]
  Timeout,

  #[error("Failed to spawn worker thread: {0}")]
  WorkerSpawnFailed(String),

  #[error("Cannot await the queue from one of its own worker threads")]
  AwaitFromWorker,
}

/// A task failure as delivered to error callbacks.
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("Task {task_id} failed: {source}")]
  Failed {
    task_id: TaskId,
    #[source]
    source: BoxError,
  },

  #[error("Task {task_id} panicked: {message}")]
  Panicked { task_id: TaskId, message: String },
}

impl TaskError {
  /// Returns the id of the task that failed.
  pub fn task_id(&self) -> TaskId {
    match self {
      TaskError::Failed { task_id, .. } | TaskError::Panicked { task_id, .. } => *task_id,
    }
  }

  /// Returns `true` if the task body panicked rather than returning an error.
  pub fn is_panic(&self) -> bool {
    matches!(self, TaskError::Panicked { .. })
  }

  /// Renders a panic payload the way the standard panic hook does.
  pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "Box<dyn Any>".to_string()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_error_accessors() {
    let failed = TaskError::Failed {
      task_id: 7,
      source: "disk full".into(),
    };
    assert_eq!(failed.task_id(), 7);
    assert!(!failed.is_panic());
    assert_eq!(failed.to_string(), "Task 7 failed: disk full");

    let panicked = TaskError::Panicked {
      task_id: 9,
      message: "boom".to_string(),
    };
    assert_eq!(panicked.task_id(), 9);
    assert!(panicked.is_panic());
  }

  #[test]
  fn test_panic_message_from_payloads() {
    let static_payload: Box<dyn std::any::Any + Send> = Box::new("static str");
    assert_eq!(TaskError::panic_message(&*static_payload), "static str");

    let owned_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
    assert_eq!(TaskError::panic_message(&*owned_payload), "owned");

    let other_payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
    assert_eq!(TaskError::panic_message(&*other_payload), "Box<dyn Any>");
  }
}
