//! End-to-end triggered acquisition over the mock session, including the
//! deferred-stop path through the firmware wait loop.

use std::time::Duration;
use ttm_meter::config::MeterSettings;
use ttm_meter::meter::Meter;
use ttm_meter::sequencer::{TriggerSequenceSignal, TriggerSequenceState};
use ttm_meter::session::mock::MockSession;

fn stub_entity(session: &mut MockSession, node: &str, member: &str, value: &str) {
    session.stub_print(&format!("{node}.outcome"), "0");
    session.stub_print(&format!("{node}.status"), "0");
    session.stub_print(&format!("{node}.{member}"), value);
    session.stub_print(&format!("{node}:isOkay()"), "true");
}

fn triggered_session() -> MockSession {
    let mut session = MockSession::new("mock::INSTR");
    stub_entity(&mut session, "ttm.ir", "resistance", "2.00");
    stub_entity(&mut session, "ttm.tr", "voltageChange", "0.0123");
    stub_entity(&mut session, "ttm.fr", "resistance", "2.08");
    stub_entity(&mut session, "ttm.est", "timeConstant", "0.0021");
    session.stub_print("ttm.est.asymptote", "0.0145");
    // A hardware trigger assert unblocks the firmware wait loop, which
    // prints its completion handshake.
    session.unblock_on_assert("OPC");
    session
}

#[tokio::test(start_paused = true)]
async fn one_triggered_pass_reads_all_entities() {
    let mut session = triggered_session();
    // The instrument was already triggered externally: the completion
    // handshake is waiting in the output buffer.
    session.raise_message_available("OPC");
    let mut meter = Meter::new(session, &MeterSettings::default()).unwrap();
    let sequencer = meter.trigger_sequencer();

    let stopper = async {
        // One pass completes well within a second; then stop the loop while
        // it waits for the next external trigger.
        tokio::time::sleep(Duration::from_secs(1)).await;
        sequencer.enqueue(TriggerSequenceSignal::Stop);
    };
    let (result, ()) = tokio::join!(meter.run_trigger_cycle(), stopper);
    result.unwrap();

    assert_eq!(meter.trigger_sequencer().state(), TriggerSequenceState::Idle);

    // Part measurements are cleared when the interrupted second pass reaches
    // MeasurementCompleted, so the pass-one values are verified through the
    // command log: every entity was read back, in one pass.
    let handle = meter.session_handle();
    let session = handle.lock().await;
    assert!(session.wrote("_G.ttm.prepareForTrigger()"));
    for query in [
        "print(ttm.ir.outcome)",
        "print(ttm.ir.resistance)",
        "print(ttm.tr.voltageChange)",
        "print(ttm.fr.resistance)",
        "print(ttm.est.timeConstant)",
        "print(ttm.est.asymptote)",
    ] {
        assert!(session.wrote(query), "missing readback: {query}");
    }
    // The deferred stop forced exactly one unblocking assert.
    assert_eq!(session.trigger_asserts(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_while_waiting_is_deferred_then_honored() {
    // No trigger ever arrives; the loop sits in WaitingForTrigger until the
    // stop request forces a hardware assert to unblock the firmware.
    let mut meter = Meter::new(triggered_session(), &MeterSettings::default()).unwrap();
    let sequencer = meter.trigger_sequencer();

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(sequencer.state(), TriggerSequenceState::WaitingForTrigger);
        sequencer.enqueue(TriggerSequenceSignal::Stop);
        // The stop is not applied while waiting; the next few ticks park it
        // and request the assert instead.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_ne!(sequencer.state(), TriggerSequenceState::Stopped);
    };
    let (result, ()) = tokio::join!(meter.run_trigger_cycle(), stopper);
    result.unwrap();

    assert_eq!(meter.trigger_sequencer().state(), TriggerSequenceState::Idle);
    assert_eq!(
        meter.trigger_sequencer().restart_signal(),
        TriggerSequenceSignal::None
    );
    let handle = meter.session_handle();
    let session = handle.lock().await;
    assert_eq!(session.trigger_asserts(), 1);
    // The pass interrupted by the stop never read entity values.
    assert!(!session.wrote("print(ttm.ir.outcome)"));
}

#[tokio::test(start_paused = true)]
async fn readback_failure_settles_idle_without_panicking() {
    // Final resistance is never stubbed: the readback pass errors out midway
    // and the loop must convert that into a Failure signal and come to rest.
    let mut session = MockSession::new("mock::INSTR");
    stub_entity(&mut session, "ttm.ir", "resistance", "2.00");
    stub_entity(&mut session, "ttm.tr", "voltageChange", "0.0123");
    session.raise_message_available("OPC");
    let mut meter = Meter::new(session, &MeterSettings::default()).unwrap();
    meter.run_trigger_cycle().await.unwrap();

    assert_eq!(meter.trigger_sequencer().state(), TriggerSequenceState::Idle);
    let handle = meter.session_handle();
    let session = handle.lock().await;
    // The readback got as far as the failing entity, then stopped.
    assert!(session.wrote("print(ttm.fr.outcome)"));
    assert!(!session.wrote("print(ttm.est.timeConstant)"));
}

#[tokio::test(start_paused = true)]
async fn abort_shutdown_unblocks_the_wait_loop() {
    let mut meter = Meter::new(triggered_session(), &MeterSettings::default()).unwrap();

    // Drive the sequencer into the waiting state by hand.
    let sequencer = meter.trigger_sequencer();
    sequencer.start();
    sequencer.execute_tick(); // Starting
    sequencer.enqueue(TriggerSequenceSignal::Step);
    sequencer.execute_tick(); // WaitingForTrigger
    assert_eq!(sequencer.state(), TriggerSequenceState::WaitingForTrigger);

    meter.abort_trigger_sequence_if().await.unwrap();
    let handle = meter.session_handle();
    assert_eq!(handle.lock().await.trigger_asserts(), 1);

    // The queued abort lands on the next tick and settles the machine.
    sequencer.execute_tick();
    assert_eq!(sequencer.state(), TriggerSequenceState::WaitingForTrigger);
    assert_eq!(sequencer.restart_signal(), TriggerSequenceSignal::Abort);
}
