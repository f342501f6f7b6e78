//! Software-paced sequential measurement state machine.
//!
//! The `MeasureSequencer` steps a full measurement cycle:
//! Idle -> Starting -> MeasureInitialResistance -> MeasureThermalTransient ->
//! PostTransientPause -> MeasureFinalResistance -> Completed, with Aborted
//! and Failed branches. Terminal-ish states cycle back toward Idle on the
//! next Step; the machine never truly terminates, it comes to rest.
//!
//! One tick consumes at most one queued signal. `PostTransientPause` is the
//! only state that advances without a signal, once the armed pause has
//! elapsed.

use super::SignalQueue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementSequenceState {
    #[default]
    Idle,
    Aborted,
    Failed,
    Starting,
    MeasureInitialResistance,
    MeasureThermalTransient,
    PostTransientPause,
    MeasureFinalResistance,
    Completed,
}

impl fmt::Display for MeasurementSequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::Starting => "starting",
            Self::MeasureInitialResistance => "measuring initial resistance",
            Self::MeasureThermalTransient => "measuring thermal transient",
            Self::PostTransientPause => "post transient pause",
            Self::MeasureFinalResistance => "measuring final resistance",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementSequenceSignal {
    #[default]
    None,
    Step,
    Abort,
    Failure,
}

#[derive(Debug)]
struct PauseTimer {
    started: Option<Instant>,
    required: Duration,
}

#[derive(Debug)]
struct Inner {
    queue: SignalQueue<MeasurementSequenceSignal>,
    state_tx: watch::Sender<MeasurementSequenceState>,
    pause: parking_lot::Mutex<PauseTimer>,
}

/// The software-paced sequencer. Cheap to clone; clones share state, so a
/// caller can keep a handle for aborting while the meter drives the ticks.
#[derive(Debug, Clone)]
pub struct MeasureSequencer {
    inner: Arc<Inner>,
}

impl Default for MeasureSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasureSequencer {
    /// Fixed tick period of the software-paced cycle.
    pub const TICK_PERIOD: Duration = Duration::from_millis(300);

    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(MeasurementSequenceState::Idle);
        Self {
            inner: Arc::new(Inner {
                queue: SignalQueue::new(),
                state_tx,
                pause: parking_lot::Mutex::new(PauseTimer {
                    started: None,
                    required: Duration::ZERO,
                }),
            }),
        }
    }

    pub fn state(&self) -> MeasurementSequenceState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to state changes. Notified only when the value differs.
    pub fn subscribe(&self) -> watch::Receiver<MeasurementSequenceState> {
        self.inner.state_tx.subscribe()
    }

    /// Begin a fresh cycle: the queue is cleared and a single Step is queued.
    /// The owner arms the tick loop.
    pub fn start(&self) {
        self.clear_signal_queue();
        self.enqueue(MeasurementSequenceSignal::Step);
    }

    pub fn enqueue(&self, signal: MeasurementSequenceSignal) {
        self.inner.queue.enqueue(signal);
    }

    pub fn clear_signal_queue(&self) {
        self.inner.queue.clear();
    }

    /// (Re)arm the stopwatch that lets `PostTransientPause` self-advance.
    pub fn start_final_resistance_time(&self, pause: Duration) {
        let mut timer = self.inner.pause.lock();
        timer.started = Some(Instant::now());
        timer.required = pause;
    }

    fn pause_elapsed(&self) -> bool {
        let timer = self.inner.pause.lock();
        match timer.started {
            Some(started) => started.elapsed() >= timer.required,
            None => false,
        }
    }

    /// One non-reentrant tick: dequeue at most one signal, transition, and
    /// publish. Returns the resulting state.
    pub fn execute_tick(&self) -> MeasurementSequenceState {
        let signal = self
            .inner
            .queue
            .try_dequeue()
            .unwrap_or(MeasurementSequenceSignal::None);
        let current = self.state();
        let next = self.transition(current, signal);
        self.inner.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        next
    }

    fn transition(
        &self,
        current: MeasurementSequenceState,
        signal: MeasurementSequenceSignal,
    ) -> MeasurementSequenceState {
        use MeasurementSequenceSignal as Signal;
        use MeasurementSequenceState as State;

        match (current, signal) {
            // No signal: hold, except the pause state which self-advances.
            (State::PostTransientPause, Signal::None) if self.pause_elapsed() => {
                State::MeasureFinalResistance
            }
            (state, Signal::None) => state,

            (State::Idle, Signal::Step) => State::Starting,
            (State::Idle, Signal::Abort) => State::Aborted,
            (State::Idle, Signal::Failure) => State::Failed,

            (State::Starting, Signal::Step) => State::MeasureInitialResistance,
            (State::MeasureInitialResistance, Signal::Step) => State::MeasureThermalTransient,
            (State::MeasureThermalTransient, Signal::Step) => State::PostTransientPause,
            (State::PostTransientPause, Signal::Step) => State::MeasureFinalResistance,
            (State::MeasureFinalResistance, Signal::Step) => State::Completed,
            (State::Completed, Signal::Step) => State::Idle,

            (
                State::Starting
                | State::MeasureInitialResistance
                | State::MeasureThermalTransient
                | State::PostTransientPause
                | State::MeasureFinalResistance
                | State::Completed,
                Signal::Abort,
            ) => State::Aborted,
            (
                State::Starting
                | State::MeasureInitialResistance
                | State::MeasureThermalTransient
                | State::PostTransientPause
                | State::MeasureFinalResistance
                | State::Completed,
                Signal::Failure,
            ) => State::Failed,

            // Fresh-cycle reset: whatever was queued is stale now.
            (State::Aborted, Signal::Step) => {
                self.clear_signal_queue();
                State::Idle
            }
            (State::Aborted, Signal::Abort) => State::Aborted,
            (State::Aborted, Signal::Failure) => State::Failed,

            (State::Failed, Signal::Step | Signal::Abort) => State::Aborted,
            (State::Failed, Signal::Failure) => State::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepped(sequencer: &MeasureSequencer) -> MeasurementSequenceState {
        sequencer.enqueue(MeasurementSequenceSignal::Step);
        sequencer.execute_tick()
    }

    #[test]
    fn none_signal_never_changes_state() {
        let sequencer = MeasureSequencer::new();
        for _ in 0..3 {
            assert_eq!(sequencer.execute_tick(), MeasurementSequenceState::Idle);
        }
        stepped(&sequencer);
        let before = sequencer.state();
        assert_eq!(sequencer.execute_tick(), before);
    }

    #[test]
    fn full_cycle_in_six_steps() {
        use MeasurementSequenceState as State;
        let sequencer = MeasureSequencer::new();
        sequencer.start();
        let expected = [
            State::Starting,
            State::MeasureInitialResistance,
            State::MeasureThermalTransient,
            State::PostTransientPause,
            State::MeasureFinalResistance,
            State::Completed,
        ];
        assert_eq!(sequencer.execute_tick(), expected[0]);
        for state in &expected[1..] {
            assert_eq!(stepped(&sequencer), *state);
        }
        // One more Step closes the loop back to rest.
        assert_eq!(stepped(&sequencer), State::Idle);
    }

    #[test]
    fn abort_from_any_mid_cycle_state() {
        use MeasurementSequenceState as State;
        for steps in 1..=6 {
            let sequencer = MeasureSequencer::new();
            sequencer.start();
            for _ in 0..steps {
                sequencer.execute_tick();
                sequencer.enqueue(MeasurementSequenceSignal::Step);
            }
            sequencer.clear_signal_queue();
            sequencer.enqueue(MeasurementSequenceSignal::Abort);
            assert_eq!(sequencer.execute_tick(), State::Aborted);
            assert_eq!(stepped(&sequencer), State::Idle);
        }
    }

    #[test]
    fn failed_settles_through_aborted_to_idle() {
        use MeasurementSequenceState as State;
        let sequencer = MeasureSequencer::new();
        sequencer.start();
        sequencer.execute_tick(); // Starting
        sequencer.enqueue(MeasurementSequenceSignal::Failure);
        assert_eq!(sequencer.execute_tick(), State::Failed);
        assert_eq!(stepped(&sequencer), State::Aborted);
        assert_eq!(stepped(&sequencer), State::Idle);
    }

    #[test]
    fn aborted_step_clears_stale_signals() {
        let sequencer = MeasureSequencer::new();
        sequencer.enqueue(MeasurementSequenceSignal::Abort);
        sequencer.execute_tick();
        sequencer.enqueue(MeasurementSequenceSignal::Step);
        sequencer.enqueue(MeasurementSequenceSignal::Failure); // stale
        assert_eq!(sequencer.execute_tick(), MeasurementSequenceState::Idle);
        assert!(sequencer.inner.queue.is_empty());
    }

    #[test]
    fn state_watch_notifies_only_on_change() {
        let sequencer = MeasureSequencer::new();
        let mut rx = sequencer.subscribe();
        assert!(!rx.has_changed().unwrap());
        sequencer.execute_tick(); // Idle -> Idle, no signal
        assert!(!rx.has_changed().unwrap());
        stepped(&sequencer);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), MeasurementSequenceState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_state_self_advances_without_a_signal() {
        use MeasurementSequenceState as State;
        let sequencer = MeasureSequencer::new();
        sequencer.start();
        sequencer.execute_tick(); // Starting
        stepped(&sequencer); // MeasureInitialResistance
        stepped(&sequencer); // MeasureThermalTransient
        sequencer.start_final_resistance_time(Duration::from_millis(500));
        stepped(&sequencer); // PostTransientPause
        assert_eq!(sequencer.state(), State::PostTransientPause);

        // Not elapsed yet: empty-queue ticks hold the state.
        assert_eq!(sequencer.execute_tick(), State::PostTransientPause);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sequencer.execute_tick(), State::MeasureFinalResistance);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_pause_restarts_the_clock() {
        use MeasurementSequenceState as State;
        let sequencer = MeasureSequencer::new();
        sequencer.start();
        sequencer.execute_tick();
        stepped(&sequencer);
        stepped(&sequencer);
        sequencer.start_final_resistance_time(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sequencer.start_final_resistance_time(Duration::from_millis(100));
        stepped(&sequencer); // PostTransientPause, fresh clock
        assert_eq!(sequencer.execute_tick(), State::PostTransientPause);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sequencer.execute_tick(), State::MeasureFinalResistance);
    }
}
