use std::pin::pin;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Counts outstanding (submitted but not finished) tasks and lets callers
/// wait for the count to reach zero.
///
/// The count is only changed under its lock, which is also the lock the
/// blocking waiters sleep on, so a waiter cannot miss the transition to zero.
#[derive(Debug, Default)]
pub(crate) struct CompletionTracker {
  outstanding: Mutex<usize>,
  drained: Condvar,
  drained_async: Notify,
}

impl CompletionTracker {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Called by `submit` before the task reaches the admission channel.
  pub(crate) fn mark_submitted(&self) {
    let mut outstanding = self.outstanding.lock();
    *outstanding += 1;
    trace!(outstanding = *outstanding, "Task marked submitted.");
  }

  /// Called once per task after its outcome was dispatched, or when the task
  /// was withdrawn before execution.
  pub(crate) fn mark_finished(&self) {
    self.mark_finished_many(1);
  }

  pub(crate) fn mark_finished_many(&self, count: usize) {
    if count == 0 {
      return;
    }
    let mut outstanding = self.outstanding.lock();
    if *outstanding < count {
      warn!(outstanding = *outstanding, count, "Finished more tasks than were outstanding; clamping to zero.");
      *outstanding = 0;
    } else {
      *outstanding -= count;
    }
    trace!(outstanding = *outstanding, "Task marked finished.");
    if *outstanding == 0 {
      self.drained.notify_all();
      self.drained_async.notify_waiters();
    }
  }

  pub(crate) fn outstanding(&self) -> usize {
    *self.outstanding.lock()
  }

  /// Blocks until the outstanding count is zero. Returns immediately if it already is.
  pub(crate) fn wait_drained(&self) {
    let mut outstanding = self.outstanding.lock();
    while *outstanding > 0 {
      self.drained.wait(&mut outstanding);
    }
  }

  /// Blocks until the outstanding count is zero or `deadline` passes.
  /// Returns `true` if the count reached zero.
  pub(crate) fn wait_drained_until(&self, deadline: Instant) -> bool {
    let mut outstanding = self.outstanding.lock();
    while *outstanding > 0 {
      if self.drained.wait_until(&mut outstanding, deadline).timed_out() {
        return *outstanding == 0;
      }
    }
    true
  }

  /// Resolves once the outstanding count is zero.
  pub(crate) async fn drained(&self) {
    loop {
      let mut notified = pin!(self.drained_async.notified());
      // Register before reading the count so a concurrent transition to zero is not lost.
      notified.as_mut().enable();
      if *self.outstanding.lock() == 0 {
        return;
      }
      notified.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn test_wait_on_zero_returns_immediately() {
    let tracker = CompletionTracker::new();
    tracker.wait_drained();
    tracker.wait_drained();
    assert_eq!(tracker.outstanding(), 0);
  }

  #[test]
  fn test_wait_blocks_until_all_finished() {
    let tracker = Arc::new(CompletionTracker::new());
    tracker.mark_submitted();
    tracker.mark_submitted();

    let released = Arc::new(AtomicBool::new(false));
    let waiter = {
      let tracker = tracker.clone();
      let released = released.clone();
      thread::spawn(move || {
        tracker.wait_drained();
        released.store(true, Ordering::SeqCst);
      })
    };

    tracker.mark_finished();
    thread::sleep(Duration::from_millis(50));
    assert!(!released.load(Ordering::SeqCst), "One task is still outstanding.");

    tracker.mark_finished();
    waiter.join().unwrap();
    assert!(released.load(Ordering::SeqCst));
  }

  #[test]
  fn test_wait_until_reports_timeout() {
    let tracker = CompletionTracker::new();
    tracker.mark_submitted();
    assert!(!tracker.wait_drained_until(Instant::now() + Duration::from_millis(20)));

    tracker.mark_finished();
    assert!(tracker.wait_drained_until(Instant::now() + Duration::from_millis(20)));
  }

  #[test]
  fn test_finish_many_never_goes_negative() {
    let tracker = CompletionTracker::new();
    tracker.mark_submitted();
    tracker.mark_finished_many(3);
    assert_eq!(tracker.outstanding(), 0);
  }

  #[tokio::test]
  async fn test_drained_resolves_after_finish() {
    let tracker = Arc::new(CompletionTracker::new());
    tracker.drained().await;

    tracker.mark_submitted();
    let finisher = {
      let tracker = tracker.clone();
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        tracker.mark_finished();
      })
    };

    tokio::time::timeout(Duration::from_secs(2), tracker.drained())
      .await
      .expect("drained() did not resolve after the last task finished");
    finisher.join().unwrap();
  }
}
