use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use fibre::mpmc::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

/// Why an item could not be admitted. The rejected item is handed back
/// where the channel still owns it.
#[derive(PartialEq, Eq)]
pub(crate) enum AdmissionError<T> {
  /// The channel was already closed when `send` was called.
  Closed(T),
  /// The channel was closed while the producer was waiting for a slot.
  Interrupted(T),
  /// No slot freed up before the deadline.
  Timeout(T),
  /// The underlying channel refused the item; it is dropped.
  Disconnected,
}

impl<T> fmt::Debug for AdmissionError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AdmissionError::Closed(_) => f.write_str("Closed(..)"),
      AdmissionError::Interrupted(_) => f.write_str("Interrupted(..)"),
      AdmissionError::Timeout(_) => f.write_str("Timeout(..)"),
      AdmissionError::Disconnected => f.write_str("Disconnected"),
    }
  }
}

struct GateState<T: Send> {
  /// Items sent but not yet taken by a consumer.
  admitted: usize,
  /// `None` once closed. Dropping the last sender lets consumers drain and stop.
  tx: Option<Sender<T>>,
}

/// Hands out one permit per channel slot and owns the only sender.
///
/// Sends happen under the gate lock, so the channel never holds more than
/// `capacity` items and a send on it never blocks.
struct CapacityGate<T: Send> {
  state: Mutex<GateState<T>>,
  slot_freed: Condvar,
  capacity: usize,
}

impl<T: Send> CapacityGate<T> {
  /// Frees the slot of an item a consumer just took.
  fn release(&self) {
    let mut state = self.state.lock();
    state.admitted = state.admitted.saturating_sub(1);
    drop(state);
    self.slot_freed.notify_one();
  }
}

/// A bounded, blocking, multi-producer, multi-consumer FIFO channel.
///
/// Items travel over a `fibre` mpmc channel; a capacity gate in front of it
/// blocks producers while `capacity` items are waiting and lets the channel
/// be closed while producers are still alive. Closing wakes every blocked
/// producer and consumer.
pub(crate) struct AdmissionChannel<T: Send> {
  gate: Arc<CapacityGate<T>>,
  rx: Receiver<T>,
}

impl<T: Send> AdmissionChannel<T> {
  /// Creates a channel holding at most `capacity` items. `capacity` must be positive.
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = mpmc::bounded(capacity);
    Self {
      gate: Arc::new(CapacityGate {
        state: Mutex::new(GateState { admitted: 0, tx: Some(tx) }),
        slot_freed: Condvar::new(),
        capacity,
      }),
      rx,
    }
  }

  /// Splits the channel into its producer and consumer halves. Both can be cloned.
  pub(crate) fn split(self) -> (AdmissionProducer<T>, AdmissionConsumer<T>) {
    (
      AdmissionProducer {
        gate: self.gate.clone(),
        drain_rx: self.rx.clone(),
      },
      AdmissionConsumer {
        gate: self.gate,
        rx: self.rx,
      },
    )
  }
}

/// The producer handle of the [`AdmissionChannel`].
pub(crate) struct AdmissionProducer<T: Send> {
  gate: Arc<CapacityGate<T>>,
  // Used only to pull pending items back out in `close_and_drain`.
  drain_rx: Receiver<T>,
}

impl<T: Send> Clone for AdmissionProducer<T> {
  fn clone(&self) -> Self {
    Self {
      gate: self.gate.clone(),
      drain_rx: self.drain_rx.clone(),
    }
  }
}

/// The consumer handle of the [`AdmissionChannel`].
pub(crate) struct AdmissionConsumer<T: Send> {
  gate: Arc<CapacityGate<T>>,
  rx: Receiver<T>,
}

impl<T: Send> Clone for AdmissionConsumer<T> {
  fn clone(&self) -> Self {
    Self {
      gate: self.gate.clone(),
      rx: self.rx.clone(),
    }
  }
}

impl<T: Send> fmt::Debug for AdmissionProducer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AdmissionProducer")
      .field("len", &self.len())
      .field("capacity", &self.gate.capacity)
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl<T: Send> fmt::Debug for AdmissionConsumer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AdmissionConsumer").finish_non_exhaustive()
  }
}

impl<T: Send> AdmissionProducer<T> {
  /// Stores `item`, blocking while the channel is full.
  pub(crate) fn send(&self, item: T) -> Result<(), AdmissionError<T>> {
    self.send_inner(item, None)
  }

  /// Like [`send`](Self::send) but gives up at `deadline`.
  pub(crate) fn send_until(&self, item: T, deadline: Instant) -> Result<(), AdmissionError<T>> {
    self.send_inner(item, Some(deadline))
  }

  fn send_inner(&self, item: T, deadline: Option<Instant>) -> Result<(), AdmissionError<T>> {
    let gate = &*self.gate;
    let mut state = gate.state.lock();
    if state.tx.is_none() {
      return Err(AdmissionError::Closed(item));
    }

    while state.admitted >= gate.capacity {
      match deadline {
        Some(deadline) => {
          if gate.slot_freed.wait_until(&mut state, deadline).timed_out()
            && state.admitted >= gate.capacity
            && state.tx.is_some()
          {
            return Err(AdmissionError::Timeout(item));
          }
        }
        None => gate.slot_freed.wait(&mut state),
      }
      if state.tx.is_none() {
        return Err(AdmissionError::Interrupted(item));
      }
    }

    let Some(tx) = state.tx.as_ref() else {
      return Err(AdmissionError::Interrupted(item));
    };
    if tx.send(item).is_err() {
      return Err(AdmissionError::Disconnected);
    }
    state.admitted += 1;
    Ok(())
  }

  /// Closes the channel. Blocked producers and idle consumers wake up;
  /// items already stored stay available to consumers.
  pub(crate) fn close(&self) {
    let sender = self.gate.state.lock().tx.take();
    drop(sender);
    self.gate.slot_freed.notify_all();
  }

  /// Closes the channel and removes every item not yet taken by a consumer.
  pub(crate) fn close_and_drain(&self) -> Vec<T> {
    let mut state = self.gate.state.lock();
    drop(state.tx.take());
    let mut pending = Vec::new();
    while let Ok(item) = self.drain_rx.try_recv() {
      pending.push(item);
    }
    state.admitted = state.admitted.saturating_sub(pending.len());
    drop(state);
    self.gate.slot_freed.notify_all();
    pending
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.gate.state.lock().tx.is_none()
  }

  /// Returns the number of items currently held.
  pub(crate) fn len(&self) -> usize {
    self.gate.state.lock().admitted
  }
}

impl<T: Send> AdmissionConsumer<T> {
  /// Takes the oldest item, blocking while the channel is empty.
  ///
  /// Returns `None` once the channel is closed and empty.
  pub(crate) fn recv(&self) -> Option<T> {
    let item = self.rx.recv().ok()?;
    self.gate.release();
    Some(item)
  }
}
