use crate::error::QueueError;

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, warn};

/// Name given to queues that are not named explicitly.
pub const DEFAULT_QUEUE_NAME: &str = "simple-task-queue";

/// Default channel capacity per worker thread.
const CAPACITY_PER_THREAD: usize = 5;

/// Immutable construction parameters of a [`SimpleTaskQueue`](crate::SimpleTaskQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
  name: Arc<String>,
  capacity: usize,
  threads: usize,
}

impl QueueConfig {
  /// Creates a configuration with the default name.
  ///
  /// Values are not checked here; [`validate`](Self::validate) runs when the
  /// queue is built.
  pub fn new(capacity: usize, threads: usize) -> Self {
    Self {
      name: Arc::new(DEFAULT_QUEUE_NAME.to_string()),
      capacity,
      threads,
    }
  }

  /// Replaces the queue name. Worker threads are named `"{name}-{n}"`.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Arc::new(name.into());
    self
  }

  /// Builds a configuration from the two named options an embedding exposes.
  ///
  /// Recognised keys are `capacity` and `threads`. Missing keys take the
  /// defaults of [`QueueConfig::default`], unknown keys are ignored, and a
  /// value that is not a positive integer is rejected.
  pub fn from_options<I, K>(options: I) -> Result<Self, QueueError>
  where
    I: IntoIterator<Item = (K, i64)>,
    K: AsRef<str>,
  {
    let mut config = Self::default();
    for (key, value) in options {
      let key = key.as_ref();
      match key {
        "capacity" => config.capacity = positive_option(key, value)?,
        "threads" => config.threads = positive_option(key, value)?,
        other => {
          warn!(option = %other, value, "Ignoring unrecognized queue option.");
        }
      }
    }
    debug!(capacity = config.capacity, threads = config.threads, "Queue configuration built from options.");
    Ok(config)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn shared_name(&self) -> Arc<String> {
    self.name.clone()
  }

  /// Maximum number of tasks held in the admission channel.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of worker threads.
  pub fn threads(&self) -> usize {
    self.threads
  }

  /// Checks the invariants `capacity > 0`, `threads > 0` and a non-empty name.
  pub fn validate(&self) -> Result<(), QueueError> {
    if self.capacity == 0 {
      return Err(QueueError::InvalidConfiguration(
        "capacity must be a positive integer, got 0".to_string(),
      ));
    }
    if self.threads == 0 {
      return Err(QueueError::InvalidConfiguration(
        "threads must be a positive integer, got 0".to_string(),
      ));
    }
    if self.name.trim().is_empty() {
      return Err(QueueError::InvalidConfiguration("queue name must not be empty".to_string()));
    }
    Ok(())
  }
}

impl Default for QueueConfig {
  /// One worker per available CPU and five channel slots per worker.
  fn default() -> Self {
    let threads = std::thread::available_parallelism()
      .map(NonZeroUsize::get)
      .unwrap_or(1);
    Self::new(threads * CAPACITY_PER_THREAD, threads)
  }
}

fn positive_option(key: &str, value: i64) -> Result<usize, QueueError> {
  if value <= 0 {
    return Err(QueueError::InvalidConfiguration(format!(
      "{} must be a positive integer, got {}",
      key, value
    )));
  }
  usize::try_from(value)
    .map_err(|_| QueueError::InvalidConfiguration(format!("{} is out of range: {}", key, value)))
}
