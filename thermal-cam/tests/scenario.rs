//! End-to-end control loop scenarios driven tick by tick with a scripted
//! camera and a mock actuator backend.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_store::MemoryStore;
use io_box::mock::{IoCounts, MockIoBackend};
use io_box::RetryPolicy;
use thermal_cam::{AuditLog, CaptureLoop, Controller, ScriptedCamera, ScriptedCameraHandle};
use thermal_cam_config::CamConfig;
use thermal_cam_types::Mode;

struct Rig {
    capture: CaptureLoop,
    camera: ScriptedCameraHandle,
    counts: Arc<IoCounts>,
    save_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let save_dir = dir.path().join("out");

    let mut cfg = CamConfig::default();
    cfg.save_dir = save_dir.clone();
    // Short windows so workers finish within a test run.
    cfg.pre_event_duration = 1.0;
    cfg.post_event_duration = 0.1;
    cfg.min_record_duration = 0.0;
    cfg.manual_record_limit = 0.2;

    let camera = ScriptedCamera::new(30.0).unwrap();
    let handle = camera.handle();
    let counts = Arc::new(IoCounts::default());
    let ctrl = Arc::new(
        Controller::new(
            &cfg,
            dir.path().join("config.json"),
            Box::new(camera),
            Arc::new(MemoryStore::new()),
            Box::new(MockIoBackend::new(counts.clone())),
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
        )
        .unwrap(),
    );
    let audit = AuditLog::new(dir.path().join("frame_log.csv")).unwrap();
    Rig {
        capture: CaptureLoop::new(ctrl, audit),
        camera: handle,
        counts,
        save_dir,
        _dir: dir,
    }
}

fn tick_at(rig: &mut Rig, deg_c: f64) {
    rig.camera.set_temperature(deg_c);
    rig.capture.tick();
}

/// Tick until the in-flight anomaly worker has finished and been reaped.
fn drain_worker(rig: &mut Rig) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while rig.capture.worker_active() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        rig.capture.tick();
    }
    assert!(!rig.capture.worker_active(), "worker stuck");
    assert!(!rig.capture.controller().is_recording());
}

fn saved_files(rig: &Rig, prefix: &str) -> Vec<String> {
    std::fs::read_dir(&rig.save_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(prefix))
        .collect()
}

#[test]
fn hysteresis_scenario_produces_exactly_two_events() {
    let mut rig = rig();

    tick_at(&mut rig, 30.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 0);

    // Crossing the start threshold raises one event, sounds the alarm and
    // starts the worker.
    tick_at(&mut rig, 55.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 1);
    assert_eq!(rig.counts.strobe.load(Ordering::SeqCst), 1);
    assert!(rig.capture.controller().io().relay_on());
    assert!(rig.capture.worker_active());

    // Still hot while recording: no second event.
    tick_at(&mut rig, 56.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 1);

    rig.camera.set_temperature(52.0);
    drain_worker(&mut rig);
    // Reaping the worker drops the relay back to OFF.
    assert!(!rig.capture.controller().io().relay_on());

    // Above the stop threshold the detector stays latched.
    tick_at(&mut rig, 52.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 1);

    // Dropping below the stop threshold re-arms, and the next crossing
    // raises a second event. The pause keeps the two video filenames, which
    // carry second-resolution timestamps, distinct.
    std::thread::sleep(Duration::from_millis(1100));
    tick_at(&mut rig, 44.0);
    tick_at(&mut rig, 30.0);
    tick_at(&mut rig, 55.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 2);

    rig.camera.set_temperature(30.0);
    drain_worker(&mut rig);

    let videos = saved_files(&rig, "merged_anomaly_temp55_");
    assert_eq!(videos.len(), 2, "videos: {videos:?}");
}

#[test]
fn acquisition_failure_trips_fault_and_suspends_detection() {
    let mut rig = rig();
    tick_at(&mut rig, 30.0);

    rig.camera.set_failing(true);
    rig.capture.tick();
    let ctrl = rig.capture.controller();
    assert_eq!(ctrl.mode(), Mode::Fault);
    assert!(!ctrl.recent_errors(10).is_empty());

    // Recovery does not clear Fault by itself; no detection happens.
    rig.camera.set_failing(false);
    tick_at(&mut rig, 60.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 0);
    assert!(!rig.capture.worker_active());

    // An operator transition back to Normal re-arms detection.
    rig.capture.controller().set_mode(Mode::Normal, "operator");
    tick_at(&mut rig, 30.0);
    tick_at(&mut rig, 60.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 1);

    rig.camera.set_temperature(30.0);
    drain_worker(&mut rig);
}

#[test]
fn disabled_event_recording_suppresses_detection() {
    let mut rig = rig();
    rig.capture
        .controller()
        .disable_event_recording("operator");
    tick_at(&mut rig, 30.0);
    tick_at(&mut rig, 60.0);
    assert_eq!(rig.counts.buzzer.load(Ordering::SeqCst), 0);
    assert!(!rig.capture.controller().is_recording());
}

#[test]
fn manual_recording_respects_ceiling_and_exclusivity() {
    let mut rig = rig();
    tick_at(&mut rig, 30.0);

    let ctrl = rig.capture.controller().clone();
    // Requested 10s, clamped to the configured 0.2s ceiling.
    assert!(ctrl.start_manual_recording(Duration::from_secs(10)));
    assert!(ctrl.is_recording());
    assert!(!ctrl.start_manual_recording(Duration::from_secs(1)));

    // An anomaly during a manual recording queues but starts no worker.
    tick_at(&mut rig, 60.0);
    assert!(!rig.capture.worker_active());
    assert_eq!(ctrl.pending_events(), 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    while ctrl.manual_recording_active() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        rig.capture.tick();
    }
    assert!(!ctrl.manual_recording_active(), "manual session stuck");

    let videos = saved_files(&rig, "thermal_video_");
    assert_eq!(videos.len(), 1, "videos: {videos:?}");

    // With the flag free again, the queued event is picked up.
    rig.camera.set_temperature(60.0);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !rig.capture.worker_active() && Instant::now() < deadline {
        rig.capture.tick();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(rig.capture.worker_active(), "queued event never started");

    rig.camera.set_temperature(30.0);
    drain_worker(&mut rig);
    assert_eq!(saved_files(&rig, "merged_anomaly_temp60_").len(), 1);
}

#[test]
fn manual_stop_finalizes_the_file() {
    let mut rig = rig();
    tick_at(&mut rig, 30.0);

    let ctrl = rig.capture.controller().clone();
    // Raise the ceiling so the stop, not the limit, ends the session.
    assert!(ctrl.set_manual_record_limit(10.0, "test"));
    assert!(ctrl.start_manual_recording(Duration::from_secs(10)));
    std::thread::sleep(Duration::from_millis(80));
    assert!(ctrl.stop_manual_recording());
    assert!(!ctrl.is_recording());
    assert!(!ctrl.stop_manual_recording());

    let videos = saved_files(&rig, "thermal_video_");
    assert_eq!(videos.len(), 1);
}

#[test]
fn audit_trail_has_one_row_per_tick() {
    let mut rig = rig();
    tick_at(&mut rig, 30.0);
    tick_at(&mut rig, 31.0);
    rig.camera.set_failing(true);
    rig.capture.tick();

    let text = std::fs::read_to_string(rig._dir.path().join("frame_log.csv")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "timestamp,mode,temperature,recording");
    assert!(lines[1].contains(",Normal,30.00,false"));
    assert!(lines[2].contains(",Normal,31.00,false"));
    // Acquisition failure logs the row with no reading, in Fault mode.
    assert!(lines[3].contains(",Fault,N/A,false"));
}

#[test]
fn screenshot_saves_last_frame() {
    let mut rig = rig();
    let ctrl = rig.capture.controller().clone();
    // No frame captured yet.
    assert!(!ctrl.take_screenshot());

    tick_at(&mut rig, 30.0);
    assert!(ctrl.take_screenshot());
    let deadline = Instant::now() + Duration::from_secs(5);
    while saved_files(&rig, "screenshot_").is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let shots = saved_files(&rig, "screenshot_");
    assert_eq!(shots.len(), 1, "shots: {shots:?}");
    assert!(shots[0].ends_with(".jpg"));
}
