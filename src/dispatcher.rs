use crate::error::TaskError;
use crate::task::{TaskId, TaskOutcome};

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tracing::{debug, error, info, trace};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Panicked,
  /// Removed from the admission channel by a cancelling shutdown, never executed.
  Discarded,
}

impl<R> From<&TaskOutcome<R>> for TaskCompletionStatus {
  fn from(outcome: &TaskOutcome<R>) -> Self {
    match outcome {
      TaskOutcome::Success(_) => TaskCompletionStatus::Success,
      TaskOutcome::Failure(TaskError::Panicked { .. }) => TaskCompletionStatus::Panicked,
      TaskOutcome::Failure(TaskError::Failed { .. }) => TaskCompletionStatus::Failed,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: TaskId,
  pub queue_name: Arc<String>,
  pub status: TaskCompletionStatus,
  /// Name of the worker thread that ran the task; `None` for discarded tasks.
  pub worker: Option<Arc<str>>,
  /// Wall time spent in the task body; `None` for discarded tasks.
  pub duration: Option<Duration>,
  pub completion_time: SystemTime,
}

pub(crate) type ResultCallback<R> = Arc<dyn Fn(&R) + Send + Sync + 'static>;
pub(crate) type ErrorCallback = Arc<dyn Fn(&TaskError) + Send + Sync + 'static>;
pub(crate) type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

/// Delivers task outcomes to the registered callbacks.
///
/// Dispatch runs on the worker thread that executed the task. The callbacks
/// for one outcome run one after another in registration order; outcomes of
/// different tasks are dispatched in parallel by their workers. Each callback
/// list is snapshotted before iteration, so registration never waits on a
/// running callback and a callback registered mid-dispatch sees the next
/// outcome, not the current one.
pub(crate) struct Dispatcher<R: Send + 'static> {
  queue_name: Arc<String>,
  result_callbacks: RwLock<Vec<ResultCallback<R>>>,
  error_callbacks: RwLock<Vec<ErrorCallback>>,
  completion_handlers: RwLock<Vec<CompletionHandler>>,
  callback_failures: AtomicU64,
}

impl<R: Send + 'static> fmt::Debug for Dispatcher<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatcher")
      .field("queue_name", &self.queue_name)
      .field("result_callbacks", &self.result_callbacks.read().len())
      .field("error_callbacks", &self.error_callbacks.read().len())
      .field("completion_handlers", &self.completion_handlers.read().len())
      .field("callback_failures", &self.callback_failure_count())
      .finish()
  }
}

impl<R: Send + 'static> Dispatcher<R> {
  pub(crate) fn new(queue_name: Arc<String>) -> Self {
    Self {
      queue_name,
      result_callbacks: RwLock::new(Vec::new()),
      error_callbacks: RwLock::new(Vec::new()),
      completion_handlers: RwLock::new(Vec::new()),
      callback_failures: AtomicU64::new(0),
    }
  }

  pub(crate) fn add_result_callback(&self, callback: impl Fn(&R) + Send + Sync + 'static) {
    let mut callbacks = self.result_callbacks.write();
    callbacks.push(Arc::new(callback));
    info!(queue = %*self.queue_name, "Dispatcher: Added result callback. Total result callbacks: {}", callbacks.len());
  }

  pub(crate) fn add_error_callback(&self, callback: impl Fn(&TaskError) + Send + Sync + 'static) {
    let mut callbacks = self.error_callbacks.write();
    callbacks.push(Arc::new(callback));
    info!(queue = %*self.queue_name, "Dispatcher: Added error callback. Total error callbacks: {}", callbacks.len());
  }

  pub(crate) fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    let mut handlers = self.completion_handlers.write();
    handlers.push(Arc::new(handler));
    info!(queue = %*self.queue_name, "Dispatcher: Added completion handler. Total handlers: {}", handlers.len());
  }

  /// Number of callback invocations that panicked since the queue was built.
  pub(crate) fn callback_failure_count(&self) -> u64 {
    self.callback_failures.load(Ordering::Relaxed)
  }

  /// Invokes the result or error callbacks for `outcome`, then the completion handlers.
  pub(crate) fn dispatch(&self, task_id: TaskId, outcome: TaskOutcome<R>, worker: &Arc<str>, duration: Duration) {
    let status = TaskCompletionStatus::from(&outcome);

    match outcome {
      TaskOutcome::Success(value) => {
        let callbacks = self.result_callbacks.read().clone();
        trace!(queue = %*self.queue_name, %task_id, "Dispatching result to {} callbacks.", callbacks.len());
        for callback in callbacks.iter() {
          self.invoke_guarded(task_id, "result", || callback(&value));
        }
      }
      TaskOutcome::Failure(task_error) => {
        let callbacks = self.error_callbacks.read().clone();
        if callbacks.is_empty() {
          debug!(queue = %*self.queue_name, %task_id, error = %task_error, "No error callbacks registered, dropping task failure.");
        } else {
          trace!(queue = %*self.queue_name, %task_id, "Dispatching failure to {} callbacks.", callbacks.len());
        }
        for callback in callbacks.iter() {
          self.invoke_guarded(task_id, "error", || callback(&task_error));
        }
      }
    }

    self.notify_completion(task_id, status, Some(worker.clone()), Some(duration));
  }

  /// Reports a task that was removed from the channel before it ran.
  pub(crate) fn dispatch_discarded(&self, task_id: TaskId) {
    self.notify_completion(task_id, TaskCompletionStatus::Discarded, None, None);
  }

  fn notify_completion(
    &self,
    task_id: TaskId,
    status: TaskCompletionStatus,
    worker: Option<Arc<str>>,
    duration: Option<Duration>,
  ) {
    let handlers = self.completion_handlers.read().clone();
    if handlers.is_empty() {
      trace!(%task_id, "No completion handlers registered, dropping notification.");
      return;
    }

    let info = TaskCompletionInfo {
      task_id,
      queue_name: self.queue_name.clone(),
      status,
      worker,
      duration,
      completion_time: SystemTime::now(),
    };

    for handler in handlers.iter() {
      let info_for_handler = info.clone();
      self.invoke_guarded(task_id, "completion", || handler(info_for_handler));
    }
  }

  /// Runs one callback, isolating a panic so it neither reaches the worker
  /// loop nor prevents the remaining callbacks from running.
  fn invoke_guarded(&self, task_id: TaskId, kind: &'static str, callback: impl FnOnce()) {
    if let Err(panic_payload) = catch_unwind(AssertUnwindSafe(callback)) {
      self.callback_failures.fetch_add(1, Ordering::Relaxed);
      error!(
        queue = %*self.queue_name,
        %task_id,
        kind,
        "A {} callback panicked during dispatch: {}",
        kind,
        TaskError::panic_message(&*panic_payload)
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;

  fn worker_name() -> Arc<str> {
    Arc::from("test-worker-1")
  }

  fn dispatcher() -> Dispatcher<u32> {
    Dispatcher::new(Arc::new("dispatch_test".to_string()))
  }

  #[test]
  fn test_result_callbacks_run_in_registration_order() {
    let dispatcher = dispatcher();
    let calls = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
      let calls = calls.clone();
      dispatcher.add_result_callback(move |value: &u32| calls.lock().push((tag, *value)));
    }

    dispatcher.dispatch(1, TaskOutcome::Success(42), &worker_name(), Duration::ZERO);

    assert_eq!(*calls.lock(), vec![("first", 42), ("second", 42), ("third", 42)]);
  }

  #[test]
  fn test_failure_reaches_only_error_callbacks() {
    let dispatcher = dispatcher();
    let results = Arc::new(Mutex::new(0usize));
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
      let results = results.clone();
      dispatcher.add_result_callback(move |_| *results.lock() += 1);
    }
    {
      let errors = errors.clone();
      dispatcher.add_error_callback(move |e: &TaskError| errors.lock().push(e.task_id()));
    }

    let failure = TaskError::Failed {
      task_id: 5,
      source: "bad input".into(),
    };
    dispatcher.dispatch(5, TaskOutcome::Failure(failure), &worker_name(), Duration::ZERO);

    assert_eq!(*results.lock(), 0);
    assert_eq!(*errors.lock(), vec![5]);
  }

  #[test]
  fn test_panicking_callback_does_not_stop_others() {
    let dispatcher = dispatcher();
    let received = Arc::new(Mutex::new(Vec::new()));
    dispatcher.add_result_callback(|_: &u32| panic!("Intentional panic in result callback"));
    {
      let received = received.clone();
      dispatcher.add_result_callback(move |v: &u32| received.lock().push(*v));
    }

    dispatcher.dispatch(2, TaskOutcome::Success(7), &worker_name(), Duration::ZERO);

    assert_eq!(*received.lock(), vec![7]);
    assert_eq!(dispatcher.callback_failure_count(), 1);
  }

  #[test]
  fn test_completion_handlers_receive_status() {
    let dispatcher = dispatcher();
    let infos = Arc::new(Mutex::new(Vec::new()));
    {
      let infos = infos.clone();
      dispatcher.add_completion_handler(move |info| infos.lock().push(info));
    }

    dispatcher.dispatch(3, TaskOutcome::Success(1), &worker_name(), Duration::from_millis(4));
    let panicked = TaskError::Panicked {
      task_id: 4,
      message: "boom".to_string(),
    };
    dispatcher.dispatch(4, TaskOutcome::Failure(panicked), &worker_name(), Duration::ZERO);
    dispatcher.dispatch_discarded(5);

    let infos = infos.lock();
    assert_eq!(infos.len(), 3);
    assert_eq!(infos[0].status, TaskCompletionStatus::Success);
    assert_eq!(infos[0].worker.as_deref(), Some("test-worker-1"));
    assert_eq!(infos[0].duration, Some(Duration::from_millis(4)));
    assert_eq!(infos[1].status, TaskCompletionStatus::Panicked);
    assert_eq!(infos[2].status, TaskCompletionStatus::Discarded);
    assert!(infos[2].worker.is_none());
    assert_eq!(*infos[2].queue_name, "dispatch_test");
  }

  #[test]
  fn test_dispatch_without_callbacks_is_a_no_op() {
    let dispatcher = dispatcher();
    dispatcher.dispatch(9, TaskOutcome::Success(0), &worker_name(), Duration::ZERO);
    assert_eq!(dispatcher.callback_failure_count(), 0);
  }
}
