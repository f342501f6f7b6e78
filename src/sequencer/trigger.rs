//! Hardware-triggered measurement state machine.
//!
//! Same queue-and-tick skeleton as the software-paced sequencer, with a
//! finer state set and a tighter 100 ms poll so status-byte changes are
//! observed promptly. The distinguishing piece is the one-slot sticky
//! `RestartSignal`: an Abort, Failure, or Stop arriving while the firmware
//! sits in its wait-for-trigger loop cannot be applied immediately (the
//! instrument would be left blocked), so it is parked, a hardware trigger
//! assert is requested to unblock the firmware, and the parked signal is
//! honored at the next completion Step.

use super::SignalQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSequenceState {
    #[default]
    Idle,
    Aborted,
    Failed,
    Stopped,
    Starting,
    WaitingForTrigger,
    MeasurementCompleted,
    ReadingValues,
}

impl fmt::Display for TriggerSequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::WaitingForTrigger => "waiting for trigger",
            Self::MeasurementCompleted => "measurement completed",
            Self::ReadingValues => "reading values",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSequenceSignal {
    #[default]
    None,
    Step,
    Abort,
    Stop,
    Failure,
}

#[derive(Debug)]
struct Inner {
    queue: SignalQueue<TriggerSequenceSignal>,
    state_tx: watch::Sender<TriggerSequenceState>,
    restart_signal: parking_lot::Mutex<TriggerSequenceSignal>,
    assert_requested: AtomicBool,
    waiting_since: parking_lot::Mutex<Option<Instant>>,
}

/// The externally-triggered sequencer. Clones share state.
#[derive(Debug, Clone)]
pub struct TriggerSequencer {
    inner: Arc<Inner>,
}

impl Default for TriggerSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSequencer {
    /// Tick period; tighter than the software-paced cycle because the wait
    /// state must observe instrument status-byte bits promptly.
    pub const TICK_PERIOD: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(TriggerSequenceState::Idle);
        Self {
            inner: Arc::new(Inner {
                queue: SignalQueue::new(),
                state_tx,
                restart_signal: parking_lot::Mutex::new(TriggerSequenceSignal::None),
                assert_requested: AtomicBool::new(false),
                waiting_since: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> TriggerSequenceState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to state publications. Unlike the software-paced sequencer,
    /// `WaitingForTrigger` is republished on every tick even when the state
    /// did not change; subscribers driving a progress display rely on it.
    pub fn subscribe(&self) -> watch::Receiver<TriggerSequenceState> {
        self.inner.state_tx.subscribe()
    }

    /// Begin a fresh triggered cycle.
    pub fn start(&self) {
        self.clear_signal_queue();
        *self.inner.restart_signal.lock() = TriggerSequenceSignal::None;
        self.inner.assert_requested.store(false, Ordering::SeqCst);
        self.enqueue(TriggerSequenceSignal::Step);
    }

    pub fn enqueue(&self, signal: TriggerSequenceSignal) {
        self.inner.queue.enqueue(signal);
    }

    pub fn clear_signal_queue(&self) {
        self.inner.queue.clear();
    }

    /// The parked signal, if any (visible for diagnostics and tests).
    pub fn restart_signal(&self) -> TriggerSequenceSignal {
        *self.inner.restart_signal.lock()
    }

    /// Consume the pending trigger-assert request, if one is set.
    pub fn take_assert_requested(&self) -> bool {
        self.inner.assert_requested.swap(false, Ordering::SeqCst)
    }

    /// Time spent in the current wait, zero when not waiting.
    pub fn waiting_elapsed(&self) -> Duration {
        match *self.inner.waiting_since.lock() {
            Some(since) => since.elapsed(),
            None => Duration::ZERO,
        }
    }

    /// One non-reentrant tick; consumes at most one signal.
    pub fn execute_tick(&self) -> TriggerSequenceState {
        let signal = self
            .inner
            .queue
            .try_dequeue()
            .unwrap_or(TriggerSequenceSignal::None);
        let current = self.state();
        let next = self.transition(current, signal);

        if next == TriggerSequenceState::WaitingForTrigger {
            if current != TriggerSequenceState::WaitingForTrigger {
                *self.inner.waiting_since.lock() = Some(Instant::now());
            }
            // Intentional quirk: always notify while waiting, even without a
            // state change, so progress polling keeps moving.
            self.inner.state_tx.send_modify(|state| *state = next);
        } else {
            if current == TriggerSequenceState::WaitingForTrigger {
                *self.inner.waiting_since.lock() = None;
            }
            self.inner.state_tx.send_if_modified(|state| {
                if *state == next {
                    false
                } else {
                    *state = next;
                    true
                }
            });
        }
        next
    }

    fn transition(
        &self,
        current: TriggerSequenceState,
        signal: TriggerSequenceSignal,
    ) -> TriggerSequenceState {
        use TriggerSequenceSignal as Signal;
        use TriggerSequenceState as State;

        match (current, signal) {
            (state, Signal::None) => state,

            (State::Idle, Signal::Step) => State::Starting,
            (State::Idle, Signal::Abort) => State::Aborted,
            (State::Idle, Signal::Stop) => State::Stopped,
            (State::Idle, Signal::Failure) => State::Failed,

            (State::Starting, Signal::Step) => State::WaitingForTrigger,
            (State::Starting, Signal::Abort) => State::Aborted,
            (State::Starting, Signal::Failure) => State::Failed,
            (State::Starting, Signal::Stop) => State::Stopped,

            (State::WaitingForTrigger, Signal::Step) => State::MeasurementCompleted,
            // Deferred: the firmware is blocked in its wait loop. Park the
            // signal, ask for a hardware assert, stay put.
            (
                State::WaitingForTrigger,
                signal @ (Signal::Abort | Signal::Failure | Signal::Stop),
            ) => {
                *self.inner.restart_signal.lock() = signal;
                self.inner.assert_requested.store(true, Ordering::SeqCst);
                State::WaitingForTrigger
            }

            (State::MeasurementCompleted, Signal::Step) => {
                self.honor_restart(State::ReadingValues)
            }
            (State::MeasurementCompleted, Signal::Abort) => State::Aborted,
            (State::MeasurementCompleted, Signal::Failure) => State::Failed,
            (State::MeasurementCompleted, Signal::Stop) => State::Stopped,

            (State::ReadingValues, Signal::Step) => self.honor_restart(State::Starting),
            (State::ReadingValues, Signal::Abort) => State::Aborted,
            (State::ReadingValues, Signal::Failure) => State::Failed,
            (State::ReadingValues, Signal::Stop) => State::Stopped,

            (State::Aborted, Signal::Step) => {
                self.clear_signal_queue();
                State::Idle
            }
            (State::Aborted, Signal::Failure) => State::Failed,
            (State::Aborted, Signal::Stop) => State::Stopped,
            (State::Aborted, Signal::Abort) => State::Aborted,

            (State::Failed, Signal::Step | Signal::Abort) => State::Aborted,
            (State::Failed, Signal::Stop) => State::Stopped,
            (State::Failed, Signal::Failure) => State::Failed,

            (State::Stopped, Signal::Step) => State::Idle,
            (State::Stopped, Signal::Abort) => State::Aborted,
            (State::Stopped, Signal::Failure) => State::Failed,
            (State::Stopped, Signal::Stop) => State::Stopped,
        }
    }

    /// A completion Step consults the parked signal: None or Step proceeds
    /// along the happy path; anything else is honored now and reset.
    fn honor_restart(&self, happy_path: TriggerSequenceState) -> TriggerSequenceState {
        use TriggerSequenceSignal as Signal;
        use TriggerSequenceState as State;

        let mut restart = self.inner.restart_signal.lock();
        let pending = std::mem::replace(&mut *restart, Signal::None);
        match pending {
            Signal::None | Signal::Step => happy_path,
            Signal::Abort => State::Aborted,
            Signal::Failure => State::Failed,
            Signal::Stop => State::Stopped,
        }
    }
}

/// Spinner characters rotated by [`progress_message`].
pub const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

/// Format a one-line progress message for the given state, rotating the
/// ASCII spinner from `last_marker`. Returns the message and the marker to
/// pass in next time.
pub fn progress_message(
    state: TriggerSequenceState,
    elapsed: Duration,
    last_marker: char,
) -> (String, char) {
    let next = SPINNER
        .iter()
        .position(|&c| c == last_marker)
        .map(|i| SPINNER[(i + 1) % SPINNER.len()])
        .unwrap_or(SPINNER[0]);
    let caption = match state {
        TriggerSequenceState::WaitingForTrigger => {
            format!("Waiting for trigger {:.1} s", elapsed.as_secs_f64())
        }
        TriggerSequenceState::ReadingValues => "Reading values".to_string(),
        TriggerSequenceState::MeasurementCompleted => "Measurement completed".to_string(),
        other => other.to_string(),
    };
    (format!("{next} {caption}"), next)
}
