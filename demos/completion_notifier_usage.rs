use simple_task_queue::{QueueConfig, ShutdownMode, SimpleTaskQueue, TaskCompletionInfo, TaskCompletionStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// Dummy task function
fn my_notified_task(id: u64, delay_ms: u64, should_panic: bool) -> String {
  std::thread::sleep(Duration::from_millis(delay_ms));
  if should_panic {
    panic!("NotifiedTask {} panicked!", id);
  }
  format!("NotifiedTask {} finished successfully after {}ms", id, delay_ms)
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Completion Notifier Example ---");

  let queue = SimpleTaskQueue::<String>::new(QueueConfig::new(10, 2).with_name("notifier_example_queue"))
    .expect("Invalid queue configuration");

  let successful_tasks_count = Arc::new(AtomicUsize::new(0));
  let failed_tasks_count = Arc::new(AtomicUsize::new(0));

  // Handler 1: Simple logger
  queue.on_complete(|info: TaskCompletionInfo| {
    info!(
      "[Logger] Task {} (Queue: {}) completed on {:?}. Status: {:?}, Took: {:?}",
      info.task_id, info.queue_name, info.worker, info.status, info.duration
    );
  });

  // Handler 2: Counter
  {
    let s_clone = successful_tasks_count.clone();
    let f_clone = failed_tasks_count.clone();
    queue.on_complete(move |info: TaskCompletionInfo| match info.status {
      TaskCompletionStatus::Success => {
        s_clone.fetch_add(1, Ordering::Relaxed);
      }
      _ => {
        f_clone.fetch_add(1, Ordering::Relaxed);
      }
    });
  }

  for i in 0..6u64 {
    let should_panic = i % 3 == 2;
    queue
      .submit(move || Ok(my_notified_task(i, 100 + i * 20, should_panic)))
      .expect("Queue closed");
  }

  queue.await_all();
  info!(
    "Success: {}, failed: {}",
    successful_tasks_count.load(Ordering::Relaxed),
    failed_tasks_count.load(Ordering::Relaxed)
  );

  queue.shutdown(ShutdownMode::Graceful);
  info!("--- Completion Notifier Example End ---");
}
