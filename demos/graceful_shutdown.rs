use simple_task_queue::{QueueConfig, QueueError, ShutdownMode, SimpleTaskQueue};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

fn work_task_fn(id: usize, duration_ms: u64) -> usize {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  thread::sleep(Duration::from_millis(duration_ms));
  id
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Shutdown Example ---");

  let queue = Arc::new(
    SimpleTaskQueue::<usize>::new(QueueConfig::new(2, 2).with_name("graceful_shutdown_queue"))
      .expect("Invalid queue configuration"),
  );
  queue.on_result(|id| info!("Task {} done", id));

  // A producer that keeps submitting; it is interrupted once the queue shuts down.
  let producer = {
    let queue = queue.clone();
    thread::spawn(move || {
      for i in 0.. {
        match queue.submit(move || Ok(work_task_fn(i, 300))) {
          Ok(_) => {}
          Err(QueueError::ShutdownInterrupted) | Err(QueueError::QueueClosed) => {
            info!("Producer stopped after {} submissions", i);
            return i;
          }
          Err(e) => panic!("Unexpected submit error: {}", e),
        }
      }
      unreachable!()
    })
  };

  thread::sleep(Duration::from_millis(700));
  info!("Initiating graceful shutdown: {}", queue);
  let discarded = queue.shutdown(ShutdownMode::Graceful);
  info!("Shutdown complete. Discarded tasks: {}", discarded);

  let submitted = producer.join().expect("Producer thread panicked");
  info!("Producer admitted {} tasks, all of which ran.", submitted);
  info!("--- Graceful Shutdown Example End ---");
}
