mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use routine_pilot::{
    CalibrationMachine, CalibrationPhase, CalibrationState, ClientError, NotificationKind,
    SessionGrant, SurfaceRect,
};
use serde_json::json;
use support::{json, session_over, MockBackend, RecordedCall};

const SURFACE: SurfaceRect = SurfaceRect {
    left: 0.0,
    top: 0.0,
    width: 1280.0,
    height: 720.0,
};

fn calibration_backend(trigger_up: Arc<AtomicBool>) -> Arc<MockBackend> {
    MockBackend::new(move |call: &RecordedCall| match call.path.as_str() {
        "/calibrate" => json(200, json!({"message": "Calibration data saved successfully"})),
        "/start_recorder_calibration" | "/start_player_calibration"
            if !trigger_up.load(Ordering::SeqCst) =>
        {
            json(500, json!({"error": "calibration window unavailable"}))
        }
        "/start_recorder_calibration" => json(200, json!({"url": "http://localhost:5000/recorder"})),
        "/start_player_calibration" => json(200, json!({"url": "http://localhost:5000/player"})),
        _ => json(404, json!({"error": "not found"})),
    })
}

fn fill_phase(machine: &mut CalibrationMachine) {
    let points: Vec<(f64, f64)> = machine
        .targets()
        .iter()
        .map(|target| (target.x * SURFACE.width, target.y * SURFACE.height))
        .collect();
    for point in points {
        machine.record_sample(point, &SURFACE).expect("sample accepted");
    }
}

fn signed_in(backend: &Arc<MockBackend>) -> (routine_pilot::Session, Arc<routine_pilot::RecordingSink>) {
    let (session, sink) = session_over(backend);
    session.login_with_session(SessionGrant::new("a-1", Some("r-1".to_string())));
    sink.clear();
    (session, sink)
}

#[tokio::test]
async fn phases_advance_forward_to_done() {
    let backend = calibration_backend(Arc::new(AtomicBool::new(true)));
    let (session, sink) = signed_in(&backend);
    let mut machine = session.calibration();

    fill_phase(&mut machine);
    let state = machine.submit_phase().await.expect("browser phase");
    assert_eq!(state, CalibrationState::Collecting(CalibrationPhase::Recorder));
    assert_eq!(machine.handoff_url(), Some("http://localhost:5000/recorder"));
    assert!(machine.samples().is_empty());

    fill_phase(&mut machine);
    machine.submit_phase().await.expect("recorder phase");
    assert_eq!(machine.phase(), Some(CalibrationPhase::Player));

    fill_phase(&mut machine);
    let state = machine.submit_phase().await.expect("player phase");
    assert_eq!(state, CalibrationState::Done);
    assert!(machine.current_target().is_none());

    let types: Vec<serde_json::Value> = backend
        .calls_to("/calibrate")
        .into_iter()
        .filter_map(|call| call.body.map(|body| body["type"].clone()))
        .collect();
    assert_eq!(types, vec![json!("browser"), json!("recorder"), json!("player")]);
    assert_eq!(backend.count("/start_recorder_calibration"), 1);
    assert_eq!(backend.count("/start_player_calibration"), 1);
    assert!(!session.launcher().has_active_task());
    assert_eq!(
        sink.messages(NotificationKind::Success),
        vec!["Calibration complete".to_string()]
    );
}

#[tokio::test]
async fn submission_carries_normalized_samples_and_aspect_ratio() {
    let backend = calibration_backend(Arc::new(AtomicBool::new(true)));
    let (session, _sink) = signed_in(&backend);
    let mut machine = session.calibration();

    fill_phase(&mut machine);
    machine.submit_phase().await.expect("submit");

    let body = backend.calls_to("/calibrate")[0]
        .body
        .clone()
        .expect("calibration body");
    assert_eq!(
        body["calibration_data"],
        json!([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.5, 0.5]])
    );
    assert_eq!(body["aspect_ratio"], json!(1280.0 / 720.0));
}

#[tokio::test]
async fn incomplete_phase_never_advances() {
    let backend = calibration_backend(Arc::new(AtomicBool::new(true)));
    let (session, sink) = signed_in(&backend);
    let mut machine = session.calibration();

    for _ in 0..4 {
        machine.record_sample((10.0, 10.0), &SURFACE).expect("sample");
    }
    assert!(!machine.is_phase_ready());

    let result = machine.submit_phase().await;
    assert!(matches!(result, Err(ClientError::Validation(_))));
    assert_eq!(machine.phase(), Some(CalibrationPhase::Browser));
    assert_eq!(machine.samples().len(), 4);
    assert!(backend.calls().is_empty());
    assert_eq!(sink.messages(NotificationKind::Error).len(), 1);

    machine.record_sample((10.0, 10.0), &SURFACE).expect("fifth sample");
    assert!(machine.is_phase_ready());
    let overflow = machine.record_sample((10.0, 10.0), &SURFACE);
    assert!(matches!(overflow, Err(ClientError::Validation(_))));

    machine.submit_phase().await.expect("full phase submits");
    assert_eq!(machine.phase(), Some(CalibrationPhase::Recorder));
}

#[tokio::test]
async fn trigger_failure_keeps_phase_and_samples_for_retry() {
    let trigger_up = Arc::new(AtomicBool::new(false));
    let backend = calibration_backend(Arc::clone(&trigger_up));
    let (session, sink) = signed_in(&backend);
    let mut machine = session.calibration();

    fill_phase(&mut machine);
    let result = machine.submit_phase().await;

    assert!(matches!(result, Err(ClientError::Backend { status: 500, .. })));
    assert_eq!(machine.phase(), Some(CalibrationPhase::Browser));
    assert_eq!(machine.samples().len(), 5);
    assert!(!session.launcher().has_active_task());
    assert_eq!(sink.messages(NotificationKind::Error).len(), 1);

    trigger_up.store(true, Ordering::SeqCst);
    machine.submit_phase().await.expect("retry succeeds");
    assert_eq!(machine.phase(), Some(CalibrationPhase::Recorder));
    assert_eq!(backend.count("/calibrate"), 2);
}

#[tokio::test]
async fn rejected_submission_keeps_phase_and_samples() {
    let backend = MockBackend::new(|call: &RecordedCall| match call.path.as_str() {
        "/calibrate" => json(500, json!({"error": "calibration store offline"})),
        _ => json(200, json!({"url": "http://localhost:5000/recorder"})),
    });
    let (session, sink) = signed_in(&backend);
    let mut machine = session.calibration();

    fill_phase(&mut machine);
    let result = machine.submit_phase().await;

    assert!(matches!(result, Err(ClientError::Backend { status: 500, .. })));
    assert_eq!(machine.phase(), Some(CalibrationPhase::Browser));
    assert_eq!(machine.samples().len(), 5);
    assert!(machine.is_phase_ready());
    assert_eq!(backend.count("/calibrate"), 1);
    assert_eq!(backend.count("/start_recorder_calibration"), 0);
    assert!(!session.launcher().has_active_task());
    assert_eq!(
        sink.messages(NotificationKind::Error),
        vec!["backend rejected the request (HTTP 500): calibration store offline".to_string()]
    );
}

#[tokio::test]
async fn cancel_discards_buffered_samples() {
    let backend = calibration_backend(Arc::new(AtomicBool::new(true)));
    let (session, _sink) = signed_in(&backend);
    let mut machine = session.calibration();

    machine.record_sample((640.0, 360.0), &SURFACE).expect("sample");
    machine.record_sample((0.0, 0.0), &SURFACE).expect("sample");

    assert_eq!(machine.cancel(), 2);
    assert!(machine.samples().is_empty());
    assert_eq!(
        machine.current_target().map(|target| target.label.as_str()),
        Some("Top Left")
    );
    assert_eq!(machine.phase(), Some(CalibrationPhase::Browser));
    assert!(backend.calls().is_empty());
}
