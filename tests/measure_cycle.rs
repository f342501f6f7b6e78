//! End-to-end software-paced measurement cycles over the mock session.

use std::time::Duration;
use ttm_meter::config::MeterSettings;
use ttm_meter::meter::Meter;
use ttm_meter::outcome::MeasurementOutcomes;
use ttm_meter::sequencer::MeasurementSequenceState;
use ttm_meter::session::mock::MockSession;

fn stub_entity(session: &mut MockSession, node: &str, member: &str, value: &str) {
    session.stub_print(&format!("{node}.outcome"), "0");
    session.stub_print(&format!("{node}.status"), "0");
    session.stub_print(&format!("{node}.{member}"), value);
    session.stub_print(&format!("{node}:isOkay()"), "true");
}

fn healthy_session() -> MockSession {
    let mut session = MockSession::new("mock::INSTR");
    session.stub_print("_G.ttm.contactCheck()", "true");
    stub_entity(&mut session, "ttm.ir", "resistance", "2.00");
    stub_entity(&mut session, "ttm.tr", "voltageChange", "0.0123");
    stub_entity(&mut session, "ttm.fr", "resistance", "2.08");
    session
}

fn command_position(log: &[String], command: &str) -> usize {
    log.iter()
        .position(|line| line == command)
        .unwrap_or_else(|| panic!("command not issued: {command}"))
}

#[tokio::test(start_paused = true)]
async fn happy_path_cycle_passes_and_settles_idle() {
    let mut meter = Meter::new(healthy_session(), &MeterSettings::default()).unwrap();
    let outcome = meter.run_measurement_cycle().await.unwrap();

    assert_eq!(outcome, MeasurementOutcomes::PART_PASSED);
    assert_eq!(
        meter.measure_sequencer().state(),
        MeasurementSequenceState::Idle
    );
    assert_eq!(meter.initial_resistance.resistance(), Some(2.0));
    assert_eq!(meter.thermal_transient.voltage_change(), Some(0.0123));
    assert_eq!(meter.final_resistance.resistance(), Some(2.08));
    assert!(meter.last_cycle_detail().is_empty());

    // The electrical sequence ran in order.
    let session = meter.session_handle();
    let session = session.lock().await;
    let log = session.command_log();
    let initial = command_position(log, "_G.ttm.measureInitialResistance()");
    let transient = command_position(log, "_G.ttm.measureThermalTransient()");
    let fin = command_position(log, "_G.ttm.measureFinalResistance()");
    assert!(initial < transient && transient < fin);
}

#[tokio::test(start_paused = true)]
async fn out_of_band_initial_resistance_fails_the_cycle() {
    let mut session = healthy_session();
    session.stub_print("ttm.ir.resistance", "5.00");
    let mut meter = Meter::new(session, &MeterSettings::default()).unwrap();
    let outcome = meter.run_measurement_cycle().await.unwrap();

    assert!(outcome.contains(MeasurementOutcomes::PART_FAILED));
    assert!(!meter.last_cycle_detail().is_empty());
    assert_eq!(
        meter.measure_sequencer().state(),
        MeasurementSequenceState::Idle
    );

    // The DUT was never pulsed.
    let handle = meter.session_handle();
    let session = handle.lock().await;
    assert!(!session.wrote("_G.ttm.measureThermalTransient()"));
}

#[tokio::test(start_paused = true)]
async fn failed_contact_check_never_sources_current() {
    let mut session = healthy_session();
    session.stub_print("_G.ttm.contactCheck()", "false");
    let mut meter = Meter::new(session, &MeterSettings::default()).unwrap();
    let outcome = meter.run_measurement_cycle().await.unwrap();

    assert!(outcome.contains(MeasurementOutcomes::FAILED_CONTACT_CHECK));
    assert!(outcome.contains(MeasurementOutcomes::MEASUREMENT_NOT_MADE));
    let handle = meter.session_handle();
    let session = handle.lock().await;
    assert!(!session.wrote("_G.ttm.measureInitialResistance()"));
    assert!(!session.wrote("_G.ttm.measureThermalTransient()"));
}

#[tokio::test(start_paused = true)]
async fn session_failure_recovers_to_idle_without_panicking() {
    // Nothing stubbed: the first read errors out. The loop must convert the
    // error into a Failure signal and settle back at rest.
    let session = MockSession::new("mock::INSTR");
    let mut meter = Meter::new(session, &MeterSettings::default()).unwrap();
    let outcome = meter.run_measurement_cycle().await.unwrap();

    assert_eq!(
        meter.measure_sequencer().state(),
        MeasurementSequenceState::Idle
    );
    assert!(!meter.last_cycle_detail().is_empty());
    assert!(!outcome.contains(MeasurementOutcomes::PART_PASSED));
}

#[tokio::test(start_paused = true)]
async fn firmware_failure_outcome_ends_cycle_with_detail() {
    let mut session = healthy_session();
    // Transient reports a bad-status outcome word.
    session.stub_print("ttm.tr.outcome", "1");
    session.stub_print("status.measurement.condition", "2");
    let mut meter = Meter::new(session, &MeterSettings::default()).unwrap();
    let outcome = meter.run_measurement_cycle().await.unwrap();

    assert!(outcome.contains(MeasurementOutcomes::DEVICE_ERROR));
    assert!(meter.last_cycle_detail().contains("bad status"));
    // The final resistance step never ran.
    let handle = meter.session_handle();
    let session = handle.lock().await;
    assert!(!session.wrote("_G.ttm.measureFinalResistance()"));
}

#[tokio::test(start_paused = true)]
async fn abort_during_pause_settles_idle_without_final_measurement() {
    let settings = MeterSettings {
        post_transient_delay: Duration::from_secs(5),
        ..MeterSettings::default()
    };
    let mut meter = Meter::new(healthy_session(), &settings).unwrap();
    let sequencer = meter.measure_sequencer();

    let aborter = async {
        // Let the cycle reach the post-transient pause, then abort it.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sequencer.enqueue(ttm_meter::sequencer::MeasurementSequenceSignal::Abort);
    };
    let (result, ()) = tokio::join!(meter.run_measurement_cycle(), aborter);
    result.unwrap();

    assert_eq!(
        meter.measure_sequencer().state(),
        MeasurementSequenceState::Idle
    );
    let handle = meter.session_handle();
    let session = handle.lock().await;
    assert!(session.wrote("_G.ttm.measureThermalTransient()"));
    assert!(!session.wrote("_G.ttm.measureFinalResistance()"));
}
