use crate::admission::{AdmissionChannel, AdmissionError, AdmissionProducer};
use crate::config::QueueConfig;
use crate::dispatcher::{Dispatcher, TaskCompletionInfo};
use crate::error::{BoxError, QueueError, TaskError};
use crate::task::{next_task_id, ManagedTask, TaskId, TaskToExecute};
use crate::tracker::CompletionTracker;
use crate::worker::{ActiveTaskMap, WorkerContext, WorkerPool};

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, error, info, trace, warn};

/// Defines how the queue should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Runs every task already admitted, then stops the workers.
  Graceful,
  /// Discards tasks still waiting in the admission channel.
  /// Tasks already executing run to completion.
  Cancel,
}

// Admission lifecycle. Only `open()` leaves CLOSED, nothing leaves SHUT_DOWN.
const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;
const STATE_SHUT_DOWN: u8 = 2;

/// A task currently executing on a worker.
#[derive(Debug, Clone)]
pub struct ActiveTask {
  pub task_id: TaskId,
  pub worker: Arc<str>,
  pub running_for: Duration,
}

/// A bounded, multi-threaded task queue.
///
/// Submitted tasks wait in a bounded admission channel and are executed by a
/// fixed pool of worker threads started at construction. Outcomes are only
/// observable through the callbacks registered with [`on_result`],
/// [`on_error`] and [`on_complete`]. [`await_all`] blocks until every task
/// submitted so far has finished.
///
/// The queue is `Sync`; share it between producer threads with an `Arc`.
///
/// [`on_result`]: SimpleTaskQueue::on_result
/// [`on_error`]: SimpleTaskQueue::on_error
/// [`on_complete`]: SimpleTaskQueue::on_complete
/// [`await_all`]: SimpleTaskQueue::await_all
pub struct SimpleTaskQueue<R: Send + 'static> {
  config: QueueConfig,
  producer: AdmissionProducer<ManagedTask<R>>,
  tracker: Arc<CompletionTracker>,
  dispatcher: Arc<Dispatcher<R>>,
  active_tasks: Arc<ActiveTaskMap>,
  state: AtomicU8,
  workers: WorkerPool,
}

impl<R: Send + 'static> SimpleTaskQueue<R> {
  /// Validates `config` and starts `config.threads()` worker threads.
  ///
  /// # Errors
  /// Returns `QueueError::InvalidConfiguration` if capacity or threads is zero.
  /// Returns `QueueError::WorkerSpawnFailed` if the OS refused to create a worker.
  pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
    if let Err(e) = config.validate() {
      error!(queue = %config.name(), "Rejecting queue configuration: {}", e);
      return Err(e);
    }

    let queue_name = config.shared_name();
    let (producer, consumer) = AdmissionChannel::new(config.capacity()).split();
    let tracker = Arc::new(CompletionTracker::new());
    let dispatcher = Arc::new(Dispatcher::new(queue_name.clone()));
    let active_tasks: Arc<ActiveTaskMap> = Arc::new(DashMap::new());

    let context = WorkerContext {
      queue_name,
      consumer,
      dispatcher: dispatcher.clone(),
      tracker: tracker.clone(),
      active_tasks: active_tasks.clone(),
    };
    let workers = match WorkerPool::start(config.threads(), context) {
      Ok(workers) => workers,
      Err(e) => {
        // Let the workers that did start see a closed channel and exit.
        producer.close();
        return Err(e);
      }
    };

    info!(
      queue = %config.name(),
      capacity = config.capacity(),
      threads = config.threads(),
      "Task queue ready."
    );

    Ok(Self {
      config,
      producer,
      tracker,
      dispatcher,
      active_tasks,
      state: AtomicU8::new(STATE_OPEN),
      workers,
    })
  }

  pub fn name(&self) -> &str {
    self.config.name()
  }

  pub fn config(&self) -> &QueueConfig {
    &self.config
  }

  pub fn capacity(&self) -> usize {
    self.config.capacity()
  }

  pub fn threads(&self) -> usize {
    self.config.threads()
  }

  /// Number of tasks submitted and not yet finished, queued or executing.
  pub fn outstanding(&self) -> usize {
    self.tracker.outstanding()
  }

  /// Returns the current number of tasks waiting in the admission channel.
  pub fn queued_task_count(&self) -> usize {
    self.producer.len()
  }

  pub fn active_task_count(&self) -> usize {
    self.active_tasks.len()
  }

  /// Snapshot of the tasks currently executing.
  pub fn active_tasks(&self) -> Vec<ActiveTask> {
    self
      .active_tasks
      .iter()
      .map(|entry| ActiveTask {
        task_id: *entry.key(),
        worker: entry.value().worker.clone(),
        running_for: entry.value().started_at.elapsed(),
      })
      .collect()
  }

  /// Number of callback invocations that panicked. Such panics are logged
  /// and otherwise ignored.
  pub fn callback_failure_count(&self) -> u64 {
    self.dispatcher.callback_failure_count()
  }

  /// Registers a callback invoked with the value of every successful task.
  ///
  /// Runs on the worker thread that executed the task, after the callbacks
  /// registered before it.
  pub fn on_result(&self, callback: impl Fn(&R) + Send + Sync + 'static) {
    self.dispatcher.add_result_callback(callback);
  }

  /// Registers a callback invoked with the failure of every failed or panicked task.
  pub fn on_error(&self, callback: impl Fn(&TaskError) + Send + Sync + 'static) {
    self.dispatcher.add_error_callback(callback);
  }

  /// Registers a handler notified of every finished or discarded task,
  /// after its result or error callbacks ran.
  pub fn on_complete(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.dispatcher.add_completion_handler(handler);
  }

  /// Submits a task, blocking while the admission channel is full.
  ///
  /// Returns the task's id once it is admitted, not once it ran. The task's
  /// own success or failure is never reported here.
  ///
  /// # Errors
  /// Returns `QueueError::QueueClosed` if the queue is closed or shut down.
  /// Returns `QueueError::ShutdownInterrupted` if the queue shut down while waiting for a slot.
  pub fn submit<F>(&self, task: F) -> Result<TaskId, QueueError>
  where
    F: FnOnce() -> Result<R, BoxError> + Send + 'static,
  {
    self.admit(Box::new(task), None)
  }

  /// Like [`submit`](Self::submit), but fails with `QueueError::Timeout` if
  /// no slot frees up within `timeout`. A timed out task is dropped unexecuted.
  pub fn submit_timeout<F>(&self, task: F, timeout: Duration) -> Result<TaskId, QueueError>
  where
    F: FnOnce() -> Result<R, BoxError> + Send + 'static,
  {
    self.admit(Box::new(task), Some(Instant::now() + timeout))
  }

  fn admit(&self, job: TaskToExecute<R>, deadline: Option<Instant>) -> Result<TaskId, QueueError> {
    if !self.is_open() {
      warn!(queue = %self.name(), "Submit: Attempted to submit task to a queue that is closed or shut down.");
      return Err(QueueError::QueueClosed);
    }

    let task_id = next_task_id();
    // Counted before admission so a concurrent await_all never sees a false zero.
    self.tracker.mark_submitted();

    let task = ManagedTask { task_id, job };
    let send_result = match deadline {
      Some(deadline) => self.producer.send_until(task, deadline),
      None => self.producer.send(task),
    };

    match send_result {
      Ok(()) => {
        debug!(queue = %self.name(), %task_id, "Task admitted to queue.");
        Ok(task_id)
      }
      Err(admission_error) => {
        self.tracker.mark_finished();
        let queue_error = match admission_error {
          AdmissionError::Closed(_) | AdmissionError::Disconnected => QueueError::QueueClosed,
          AdmissionError::Interrupted(_) => QueueError::ShutdownInterrupted,
          AdmissionError::Timeout(_) => QueueError::Timeout,
        };
        warn!(queue = %self.name(), %task_id, "Submit: Task not admitted: {}", queue_error);
        Err(queue_error)
      }
    }
  }

  /// Blocks until every task submitted so far has finished and its callbacks ran.
  ///
  /// Returns immediately when nothing is outstanding. The queue stays open, so
  /// this can be called again after further submissions.
  ///
  /// # Panics
  /// Panics when called from one of this queue's worker threads (inside a
  /// task or a callback): the outstanding count includes the caller's own
  /// task, so the wait could never finish. Inside a task the panic is
  /// reported to the error callbacks like any other task panic. Use
  /// [`await_timeout`](Self::await_timeout) to get an error instead.
  pub fn await_all(&self) {
    if self.workers.is_worker_thread() {
      error!(queue = %self.name(), "await_all called from a worker thread.");
      panic!(
        "await_all called from a worker thread of queue \"{}\"; it would wait on its own task",
        self.name()
      );
    }
    trace!(queue = %self.name(), outstanding = self.outstanding(), "Awaiting outstanding tasks.");
    self.tracker.wait_drained();
    debug!(queue = %self.name(), "Queue drained.");
  }

  /// Like [`await_all`](Self::await_all) with an upper bound on the wait.
  ///
  /// # Errors
  /// Returns `QueueError::Timeout` if tasks are still outstanding after `timeout`.
  /// Returns `QueueError::AwaitFromWorker` without waiting when called from one
  /// of this queue's worker threads.
  pub fn await_timeout(&self, timeout: Duration) -> Result<(), QueueError> {
    if self.workers.is_worker_thread() {
      warn!(queue = %self.name(), "await_timeout called from a worker thread; not waiting.");
      return Err(QueueError::AwaitFromWorker);
    }
    if self.tracker.wait_drained_until(Instant::now() + timeout) {
      Ok(())
    } else {
      debug!(queue = %self.name(), outstanding = self.outstanding(), "Timed out awaiting outstanding tasks.");
      Err(QueueError::Timeout)
    }
  }

  /// Resolves once every task submitted so far has finished.
  ///
  /// For embeddings running on an async runtime; does not block the executor thread.
  pub async fn drained(&self) {
    self.tracker.drained().await;
  }

  /// Re-enables admission after [`close`](Self::close). Has no effect after shutdown.
  pub fn open(&self) -> &Self {
    match self
      .state
      .compare_exchange(STATE_CLOSED, STATE_OPEN, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
    {
      Ok(_) => debug!(queue = %self.name(), "Queue opened."),
      Err(STATE_SHUT_DOWN) => warn!(queue = %self.name(), "Cannot reopen a queue that was shut down."),
      Err(_) => trace!(queue = %self.name(), "Queue already open."),
    }
    self
  }

  /// Stops admission of new tasks. Admitted tasks still run, and producers
  /// already blocked in `submit` are not interrupted.
  pub fn close(&self) -> &Self {
    if self
      .state
      .compare_exchange(STATE_OPEN, STATE_CLOSED, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
      .is_ok()
    {
      debug!(queue = %self.name(), "Queue closed.");
    }
    self
  }

  pub fn is_open(&self) -> bool {
    self.state.load(AtomicOrdering::SeqCst) == STATE_OPEN
  }

  pub fn is_shut_down(&self) -> bool {
    self.state.load(AtomicOrdering::SeqCst) == STATE_SHUT_DOWN
  }

  /// Permanently stops the queue and joins its worker threads.
  ///
  /// Producers blocked on a full channel wake with
  /// `QueueError::ShutdownInterrupted`. Returns the number of admitted tasks
  /// that were discarded without running (always 0 for `Graceful`).
  ///
  /// Concurrent callers all return only after the workers were joined. Called
  /// from a worker thread, it stops admission and returns without joining.
  pub fn shutdown(&self, mode: ShutdownMode) -> usize {
    let already_shut_down = self.state.swap(STATE_SHUT_DOWN, AtomicOrdering::SeqCst) == STATE_SHUT_DOWN;

    if already_shut_down {
      info!(queue = %self.name(), "Shutdown already in progress or completed (mode: {:?}).", mode);
    } else {
      info!(queue = %self.name(), "Initiating queue shutdown (mode: {:?}).", mode);
    }

    let discarded = match mode {
      ShutdownMode::Graceful => {
        self.producer.close();
        0
      }
      ShutdownMode::Cancel => {
        let pending = self.producer.close_and_drain();
        for task in &pending {
          debug!(queue = %self.name(), task_id = task.task_id, "Discarding queued task during shutdown.");
          self.dispatcher.dispatch_discarded(task.task_id);
        }
        self.tracker.mark_finished_many(pending.len());
        if !pending.is_empty() {
          warn!(queue = %self.name(), "Discarded {} queued tasks during shutdown.", pending.len());
        }
        pending.len()
      }
    };

    if self.workers.join() {
      info!(queue = %self.name(), "Queue shutdown completed.");
    } else {
      debug!(queue = %self.name(), "Shutdown returning without joining workers in this call.");
    }
    discarded
  }
}

impl<R: Send + 'static> fmt::Debug for SimpleTaskQueue<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SimpleTaskQueue")
      .field("config", &self.config)
      .field("outstanding", &self.outstanding())
      .field("producer", &self.producer)
      .field("dispatcher", &self.dispatcher)
      .field("open", &self.is_open())
      .field("shut_down", &self.is_shut_down())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> fmt::Display for SimpleTaskQueue<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[ SimpleTaskQueue name: \"{}\", capacity: {}, workers: {}, length: {} ]",
      self.name(),
      self.capacity(),
      self.threads(),
      self.outstanding()
    )
  }
}

impl<R: Send + 'static> Drop for SimpleTaskQueue<R> {
  fn drop(&mut self) {
    if self.state.swap(STATE_SHUT_DOWN, AtomicOrdering::SeqCst) != STATE_SHUT_DOWN {
      // Closing lets the workers finish what was admitted and then exit on
      // their own; joining here could block the dropping thread indefinitely.
      info!(
        queue = %self.name(),
        "SimpleTaskQueue dropped without shutdown. Closing admission; workers exit after draining."
      );
      self.producer.close();
    } else {
      trace!(queue = %self.name(), "Drop: Shutdown already completed. No new signals sent.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_rejects_invalid_configuration() {
    assert!(matches!(
      SimpleTaskQueue::<u32>::new(QueueConfig::new(0, 1)),
      Err(QueueError::InvalidConfiguration(_))
    ));
    assert!(matches!(
      SimpleTaskQueue::<u32>::new(QueueConfig::new(1, 0)),
      Err(QueueError::InvalidConfiguration(_))
    ));
  }

  #[test]
  fn test_display_reports_name_and_sizes() {
    let queue = SimpleTaskQueue::<u32>::new(QueueConfig::new(10, 2).with_name("display_queue")).unwrap();
    assert_eq!(
      queue.to_string(),
      "[ SimpleTaskQueue name: \"display_queue\", capacity: 10, workers: 2, length: 0 ]"
    );
    queue.shutdown(ShutdownMode::Graceful);
  }

  #[test]
  fn test_close_rejects_and_open_readmits() {
    let queue = SimpleTaskQueue::<u32>::new(QueueConfig::new(4, 1)).unwrap();
    queue.close();
    assert_eq!(queue.submit(|| Ok(1)), Err(QueueError::QueueClosed));
    assert_eq!(queue.outstanding(), 0, "A rejected submit must not stay outstanding.");

    queue.open();
    assert!(queue.submit(|| Ok(2)).is_ok());
    queue.await_all();
    queue.shutdown(ShutdownMode::Graceful);

    queue.open();
    assert!(!queue.is_open(), "A shut down queue cannot be reopened.");
  }

  #[test]
  fn test_open_racing_shutdown_never_reopens() {
    for _ in 0..20 {
      let queue = SimpleTaskQueue::<u32>::new(QueueConfig::new(4, 1)).unwrap();
      queue.close();
      std::thread::scope(|scope| {
        scope.spawn(|| {
          for _ in 0..1000 {
            queue.open();
            queue.close();
          }
        });
        queue.shutdown(ShutdownMode::Graceful);
      });
      assert!(queue.is_shut_down());
      assert!(!queue.is_open());
      assert_eq!(queue.submit(|| Ok(1)), Err(QueueError::QueueClosed));
    }
  }
}
