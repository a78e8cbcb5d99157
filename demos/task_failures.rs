use simple_task_queue::{QueueConfig, ShutdownMode, SimpleTaskQueue, TaskError};
use std::time::Duration;
use tracing::info;

fn parse_port(raw: &'static str) -> Result<u16, simple_task_queue::BoxError> {
  std::thread::sleep(Duration::from_millis(50));
  Ok(raw.parse::<u16>()?)
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Failures Example ---");

  let queue = SimpleTaskQueue::<u16>::new(QueueConfig::new(5, 1).with_name("failure_queue"))
    .expect("Invalid queue configuration");

  queue.on_result(|port| info!("Parsed port {}", port));
  queue.on_error(|e: &TaskError| match e {
    TaskError::Failed { task_id, source } => info!("Task {} returned an error: {}", task_id, source),
    TaskError::Panicked { task_id, message } => info!("Task {} panicked: {}", task_id, message),
  });

  for raw in ["8080", "not-a-port", "99999", "443"] {
    queue.submit(move || parse_port(raw)).expect("Queue closed");
  }
  queue
    .submit(|| panic!("This task is designed to panic!"))
    .expect("Queue closed");

  queue.await_all();
  info!("All tasks finished; the worker survived every failure.");

  queue.shutdown(ShutdownMode::Graceful);
  info!("--- Task Failures Example End ---");
}
