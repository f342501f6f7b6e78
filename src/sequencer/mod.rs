//! Timer-driven measurement sequencers.
//!
//! Both sequencers share the same skeleton: a mutex-guarded FIFO of signals,
//! a non-reentrant tick that consumes at most one signal and computes one
//! state transition, and a `tokio::sync::watch` channel publishing the state
//! to subscribers. The owning [`crate::meter::Meter`] arms the tick loop and
//! performs the instrument I/O that each state calls for.

pub mod measure;
pub mod trigger;

pub use measure::{MeasureSequencer, MeasurementSequenceSignal, MeasurementSequenceState};
pub use trigger::{progress_message, TriggerSequenceSignal, TriggerSequenceState, TriggerSequencer};

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A thread-safe FIFO of sequencer signals.
///
/// The queue is the sole point of cross-thread communication into a
/// sequencer; state fields themselves are only mutated from the tick, so the
/// lock covers exactly enqueue, dequeue, and the wholesale clear.
#[derive(Debug, Default)]
pub struct SignalQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> SignalQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, signal: T) {
        self.inner.lock().push_back(signal);
    }

    /// Non-blocking dequeue; `None` immediately if the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
