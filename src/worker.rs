use crate::admission::AdmissionConsumer;
use crate::dispatcher::Dispatcher;
use crate::error::{QueueError, TaskError};
use crate::task::{ManagedTask, TaskId, TaskOutcome};
use crate::tracker::CompletionTracker;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, debug_span, error, info, info_span, trace, warn};

/// Bookkeeping for a task currently running on a worker.
#[derive(Debug, Clone)]
pub(crate) struct ActiveTaskInfo {
  pub(crate) worker: Arc<str>,
  pub(crate) started_at: Instant,
}

pub(crate) type ActiveTaskMap = DashMap<TaskId, ActiveTaskInfo>;

/// Everything a worker loop needs, cloned once per worker.
pub(crate) struct WorkerContext<R: Send + 'static> {
  pub(crate) queue_name: Arc<String>,
  pub(crate) consumer: AdmissionConsumer<ManagedTask<R>>,
  pub(crate) dispatcher: Arc<Dispatcher<R>>,
  pub(crate) tracker: Arc<CompletionTracker>,
  pub(crate) active_tasks: Arc<ActiveTaskMap>,
}

impl<R: Send + 'static> Clone for WorkerContext<R> {
  fn clone(&self) -> Self {
    Self {
      queue_name: self.queue_name.clone(),
      consumer: self.consumer.clone(),
      dispatcher: self.dispatcher.clone(),
      tracker: self.tracker.clone(),
      active_tasks: self.active_tasks.clone(),
    }
  }
}

/// A fixed set of named OS threads, each running [`run_worker_loop`].
///
/// Workers exit once the admission channel is closed and empty.
#[derive(Debug)]
pub(crate) struct WorkerPool {
  queue_name: Arc<String>,
  thread_ids: Vec<ThreadId>,
  handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
  /// Spawns `threads` workers named `"{queue_name}-{n}"`, `n` starting at 1.
  ///
  /// If a spawn fails the caller must close the admission channel so the
  /// workers already started can exit.
  pub(crate) fn start<R: Send + 'static>(threads: usize, context: WorkerContext<R>) -> Result<Self, QueueError> {
    let mut handles = Vec::with_capacity(threads);
    for n in 1..=threads {
      let worker_name = format!("{}-{}", context.queue_name, n);
      let worker_context = context.clone();
      let spawn_result = thread::Builder::new()
        .name(worker_name.clone())
        .spawn(move || run_worker_loop(Arc::from(worker_name), worker_context));
      match spawn_result {
        Ok(handle) => handles.push(handle),
        Err(io_error) => {
          error!(queue = %*context.queue_name, worker = n, "Failed to spawn worker thread: {}", io_error);
          return Err(QueueError::WorkerSpawnFailed(io_error.to_string()));
        }
      }
    }
    info!(queue = %*context.queue_name, threads, "Worker pool started.");
    Ok(Self {
      queue_name: context.queue_name,
      thread_ids: handles.iter().map(|handle| handle.thread().id()).collect(),
      handles: Mutex::new(handles),
    })
  }

  /// Returns `true` when called from one of this pool's worker threads.
  pub(crate) fn is_worker_thread(&self) -> bool {
    let current = thread::current().id();
    self.thread_ids.contains(&current)
  }

  /// Joins every worker. Must be called after the admission channel is closed.
  ///
  /// Returns `true` if this call joined the workers. A concurrent caller
  /// blocks until the first one finished joining and then returns `false`.
  /// A worker cannot wait for its own exit, so from a worker thread (for
  /// example inside a callback) this returns `false` at once and the workers
  /// exit on their own after draining.
  pub(crate) fn join(&self) -> bool {
    if self.is_worker_thread() {
      warn!(queue = %*self.queue_name, "Shutdown requested from a worker thread; workers are not joined.");
      return false;
    }

    // Held for the whole join so later callers wait for it.
    let mut handles = self.handles.lock();
    if handles.is_empty() {
      trace!(queue = %*self.queue_name, "Workers already joined by another caller.");
      return false;
    }

    for handle in handles.drain(..) {
      let worker_name = handle.thread().name().unwrap_or("<unnamed>").to_string();
      match handle.join() {
        Ok(()) => debug!(queue = %*self.queue_name, worker = %worker_name, "Worker joined."),
        Err(_) => error!(queue = %*self.queue_name, worker = %worker_name, "Worker thread panicked outside task isolation."),
      }
    }
    info!(queue = %*self.queue_name, "All workers joined.");
    true
  }
}

/// Dequeues and runs tasks until the admission channel is closed and empty.
pub(crate) fn run_worker_loop<R: Send + 'static>(worker_name: Arc<str>, context: WorkerContext<R>) {
  let span = info_span!("queue_worker", queue = %*context.queue_name, worker = %worker_name);
  let _entered = span.enter();
  info!("Worker loop started.");

  while let Some(task) = context.consumer.recv() {
    let ManagedTask { task_id, job } = task;
    context.active_tasks.insert(
      task_id,
      ActiveTaskInfo {
        worker: worker_name.clone(),
        started_at: Instant::now(),
      },
    );

    let task_span = debug_span!("queued_task", %task_id);
    let task_entered = task_span.enter();
    debug!("Dequeued task. Executing.");

    let started_at = Instant::now();
    let outcome = match catch_unwind(AssertUnwindSafe(job)) {
      Ok(Ok(value)) => {
        trace!("Task executed successfully.");
        TaskOutcome::Success(value)
      }
      Ok(Err(source)) => {
        debug!(error = %source, "Task returned an error.");
        TaskOutcome::Failure(TaskError::Failed { task_id, source })
      }
      Err(panic_payload) => {
        let message = TaskError::panic_message(&*panic_payload);
        warn!(%message, "Task panicked during execution.");
        TaskOutcome::Failure(TaskError::Panicked { task_id, message })
      }
    };
    let duration = started_at.elapsed();

    context.dispatcher.dispatch(task_id, outcome, &worker_name, duration);
    drop(task_entered);

    context.active_tasks.remove(&task_id);
    context.tracker.mark_finished();
  }

  info!("Worker loop stopped: admission channel closed and empty.");
}
