use simple_task_queue::{QueueConfig, ShutdownMode, SimpleTaskQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  format!("Task {} finished successfully after {}ms", id, delay_ms)
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let queue = SimpleTaskQueue::<String>::new(
    QueueConfig::new(
      10, // Channel capacity
      2,  // Worker threads
    )
    .with_name("basic_queue"),
  )
  .expect("Invalid queue configuration");

  let result_count = Arc::new(AtomicUsize::new(0));
  {
    let result_count = result_count.clone();
    queue.on_result(move |result: &String| {
      result_count.fetch_add(1, Ordering::SeqCst);
      info!("Result: {}", result);
    });
  }
  queue.on_error(|e| tracing::error!("Task failed: {}", e));

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    match queue.submit(move || Ok(my_task_fn(i, sleep_duration))) {
      Ok(task_id) => info!("Submitted task {} with id {}", i, task_id),
      Err(e) => tracing::error!("Failed to submit task {}: {}", i, e),
    }
  }

  info!("All tasks submitted: {}. Awaiting completion...", queue);
  queue.await_all();
  info!("{} results received.", result_count.load(Ordering::SeqCst));

  queue.shutdown(ShutdownMode::Graceful);
  info!("--- Basic Usage Example End ---");
}
