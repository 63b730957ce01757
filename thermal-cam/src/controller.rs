//! The controller owns all mutable system state and exposes the backend
//! control surface.
//!
//! Every administrative change is clamped to its documented bounds, logged
//! with old/new value and an actor string, and followed by an atomic rewrite
//! of the configuration file. No operation panics across this surface; each
//! returns a success indicator or a snapshot.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use frame_store::FrameStore;
use io_box::{IoBackend, IoGateway, RetryPolicy};
use thermal_cam_config::{self as config, CamConfig};
use thermal_cam_types::{
    AnomalyEvent, ErrorEntry, ErrorHistory, Mode, RecordingKind, RuntimeStatus, ThresholdPair,
};

use crate::camera::ThermalCamera;
use crate::manual::ManualSession;
use crate::recording::RecordingFlag;
use crate::Result;

/// Test mode falls back to Normal after this long without a fresh `set_mode`.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Runtime view of the persisted configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub thresholds: ThresholdPair,
    pub min_record: Duration,
    pub pre_event: Duration,
    pub post_event: Duration,
    pub manual_limit: Duration,
    pub save_dir: PathBuf,
    pub recording_kind: RecordingKind,
    pub event_recording_enabled: bool,
    pub mode: Mode,
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

impl From<&CamConfig> for Settings {
    fn from(cfg: &CamConfig) -> Self {
        Self {
            thresholds: ThresholdPair {
                start: cfg.start_threshold,
                stop: cfg.stop_threshold,
            },
            min_record: secs(cfg.min_record_duration),
            pre_event: secs(cfg.pre_event_duration),
            post_event: secs(cfg.post_event_duration),
            manual_limit: secs(cfg.manual_record_limit),
            save_dir: cfg.save_dir.clone(),
            recording_kind: cfg.recording_type,
            event_recording_enabled: cfg.event_recording_enabled,
            mode: cfg.mode,
        }
    }
}

impl Settings {
    fn to_config(&self) -> CamConfig {
        CamConfig {
            start_threshold: self.thresholds.start,
            stop_threshold: self.thresholds.stop,
            min_record_duration: self.min_record.as_secs_f64(),
            pre_event_duration: self.pre_event.as_secs_f64(),
            post_event_duration: self.post_event.as_secs_f64(),
            manual_record_limit: self.manual_limit.as_secs_f64(),
            save_dir: self.save_dir.clone(),
            recording_type: self.recording_kind,
            event_recording_enabled: self.event_recording_enabled,
            mode: self.mode,
        }
    }
}

/// Last good frame, kept for screenshots and as a dimension fallback for the
/// video writers.
#[derive(Debug, Clone)]
pub(crate) struct LastFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub(crate) struct Shared {
    pub settings: Settings,
    pub test_entered_at: Option<Instant>,
    pub last_trigger_time: Option<DateTime<Utc>>,
    pub last_frame: Option<LastFrame>,
}

pub struct Controller {
    pub(crate) shared: Mutex<Shared>,
    config_path: PathBuf,
    pub(crate) recording: RecordingFlag,
    shutdown: Arc<AtomicBool>,
    pub(crate) errors: Arc<ErrorHistory>,
    pub(crate) io: IoGateway,
    pub(crate) store: Arc<dyn FrameStore>,
    pub(crate) camera: Mutex<Box<dyn ThermalCamera>>,
    pub(crate) events_tx: Sender<AnomalyEvent>,
    pub(crate) events_rx: Receiver<AnomalyEvent>,
    pub(crate) manual: Mutex<Option<ManualSession>>,
    test_timeout: Duration,
}

impl Controller {
    pub fn new(
        cfg: &CamConfig,
        config_path: impl AsRef<Path>,
        camera: Box<dyn ThermalCamera>,
        store: Arc<dyn FrameStore>,
        io_backend: Box<dyn IoBackend>,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let settings = Settings::from(cfg);
        std::fs::create_dir_all(&settings.save_dir)?;
        let errors = Arc::new(ErrorHistory::new());
        let io = IoGateway::new(io_backend, retry_policy, errors.clone());
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let test_entered_at = match settings.mode {
            Mode::Test => Some(Instant::now()),
            _ => None,
        };
        Ok(Self {
            shared: Mutex::new(Shared {
                settings,
                test_entered_at,
                last_trigger_time: None,
                last_frame: None,
            }),
            config_path: config_path.as_ref().to_path_buf(),
            recording: RecordingFlag::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            errors,
            io,
            store,
            camera: Mutex::new(camera),
            events_tx,
            events_rx,
            manual: Mutex::new(None),
            test_timeout: DEFAULT_TEST_TIMEOUT,
        })
    }

    /// Shorten the Test mode timeout; used by tests.
    pub fn set_test_timeout(&mut self, timeout: Duration) {
        self.test_timeout = timeout;
    }

    // ---- lifecycle ----------------------------------------------------

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn mode(&self) -> Mode {
        self.shared.lock().settings.mode
    }

    pub fn errors(&self) -> &Arc<ErrorHistory> {
        &self.errors
    }

    pub fn io(&self) -> &IoGateway {
        &self.io
    }

    /// Pending anomaly events, in FIFO order.
    pub fn pending_events(&self) -> usize {
        self.events_rx.len()
    }

    // ---- internal helpers ---------------------------------------------

    fn persist(&self, shared: &Shared) {
        if let Err(e) = config::save_config(&shared.settings.to_config(), &self.config_path) {
            tracing::warn!("config save failed: {e}");
        }
    }

    fn log_change<T: std::fmt::Display>(name: &str, old: T, new: T, actor: &str) {
        tracing::info!("config change: {name}: {old} -> {new} (by {actor})");
    }

    /// Whether the detection path is armed for the current settings.
    pub(crate) fn detection_armed(settings: &Settings) -> bool {
        match settings.mode {
            Mode::Normal => settings.event_recording_enabled,
            Mode::Test => settings.recording_kind == RecordingKind::Event,
            Mode::Fault => false,
        }
    }

    /// Switch Test mode back to Normal once the timeout elapses.
    pub(crate) fn apply_test_timeout(&self) {
        let mut shared = self.shared.lock();
        if shared.settings.mode != Mode::Test {
            return;
        }
        let expired = shared
            .test_entered_at
            .map(|t| t.elapsed() >= self.test_timeout)
            .unwrap_or(true);
        if expired {
            tracing::info!("test mode timeout, switching to Normal");
            shared.settings.mode = Mode::Normal;
            shared.test_entered_at = None;
            self.persist(&shared);
        }
    }

    pub(crate) fn enqueue_event(&self, event: AnomalyEvent) {
        self.shared.lock().last_trigger_time = Some(event.raised_at);
        if self.events_tx.send(event).is_err() {
            self.errors.push("anomaly queue is closed, event dropped");
        }
    }

    // ---- backend control surface ---------------------------------------

    /// Mode transitions are honored in every mode, including Fault.
    pub fn set_mode(&self, mode: Mode, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        let old = shared.settings.mode;
        shared.settings.mode = mode;
        shared.test_entered_at = match mode {
            Mode::Test => Some(Instant::now()),
            _ => None,
        };
        Self::log_change("mode", old, mode, actor);
        self.persist(&shared);
        true
    }

    pub fn set_start_threshold(&self, value: f64, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        let old = shared.settings.thresholds.start;
        shared.settings.thresholds.start = ThresholdPair::clamp_temperature(value);
        Self::log_change("start_threshold", old, shared.settings.thresholds.start, actor);
        self.persist(&shared);
        true
    }

    pub fn set_stop_threshold(&self, value: f64, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        let old = shared.settings.thresholds.stop;
        shared.settings.thresholds.stop = ThresholdPair::clamp_temperature(value);
        Self::log_change("stop_threshold", old, shared.settings.thresholds.stop, actor);
        self.persist(&shared);
        true
    }

    pub fn set_post_event_duration(&self, seconds: f64, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        let old = shared.settings.post_event.as_secs_f64();
        let new = config::clamp_post_event_secs(seconds);
        shared.settings.post_event = secs(new);
        Self::log_change("post_event_duration", old, new, actor);
        self.persist(&shared);
        true
    }

    pub fn set_manual_record_limit(&self, seconds: f64, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        let old = shared.settings.manual_limit.as_secs_f64();
        let new = config::clamp_manual_record_limit_secs(seconds);
        shared.settings.manual_limit = secs(new);
        Self::log_change("manual_record_limit", old, new, actor);
        self.persist(&shared);
        true
    }

    pub fn set_save_dir(&self, path: impl Into<PathBuf>, actor: &str) -> bool {
        let path = path.into();
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        if let Err(e) = std::fs::create_dir_all(&path) {
            self.errors
                .push(format!("cannot create save dir \"{}\": {e}", path.display()));
            return false;
        }
        let old = shared.settings.save_dir.display().to_string();
        Self::log_change("save_dir", old, path.display().to_string(), actor);
        shared.settings.save_dir = path;
        self.persist(&shared);
        true
    }

    pub fn enable_event_recording(&self, actor: &str) -> bool {
        self.set_event_recording(true, actor)
    }

    pub fn disable_event_recording(&self, actor: &str) -> bool {
        self.set_event_recording(false, actor)
    }

    fn set_event_recording(&self, enabled: bool, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        let old = shared.settings.event_recording_enabled;
        shared.settings.event_recording_enabled = enabled;
        Self::log_change("event_recording_enabled", old, enabled, actor);
        self.persist(&shared);
        true
    }

    pub fn set_recording_type(&self, kind: RecordingKind, actor: &str) -> bool {
        let mut shared = self.shared.lock();
        if shared.settings.mode == Mode::Fault {
            return false;
        }
        let old = shared.settings.recording_kind;
        shared.settings.recording_kind = kind;
        Self::log_change("recording_type", old, kind, actor);
        self.persist(&shared);
        true
    }

    /// Direct actuator pulses are honored in Test mode only.
    pub fn trigger_buzzer(&self) -> bool {
        if self.mode() != Mode::Test {
            return false;
        }
        self.io.trigger_buzzer()
    }

    pub fn trigger_strobe(&self) -> bool {
        if self.mode() != Mode::Test {
            return false;
        }
        self.io.trigger_strobe()
    }

    pub fn set_relay(&self, on: bool) -> bool {
        if self.mode() != Mode::Test {
            return false;
        }
        self.io.set_relay(on)
    }

    pub fn freeze_relay(&self) -> bool {
        if self.mode() == Mode::Fault {
            return false;
        }
        self.io.freeze_relay();
        true
    }

    pub fn unfreeze_relay(&self) -> bool {
        if self.mode() == Mode::Fault {
            return false;
        }
        self.io.unfreeze_relay();
        true
    }

    /// Save the last captured frame as `screenshot_<timestamp>.jpg`.
    ///
    /// Diagnostics: allowed in every mode, including Fault.
    pub fn take_screenshot(&self) -> bool {
        let (frame, save_dir) = {
            let shared = self.shared.lock();
            match &shared.last_frame {
                Some(f) => (f.jpeg.clone(), shared.settings.save_dir.clone()),
                None => return false,
            }
        };
        let errors = self.errors.clone();
        let spawned = std::thread::Builder::new()
            .name("screenshot".to_string())
            .spawn(move || {
                let ts = Utc::now().format("%Y%m%d_%H%M%S");
                let filename = save_dir.join(format!("screenshot_{ts}.jpg"));
                match std::fs::write(&filename, &frame) {
                    Ok(()) => tracing::info!("screenshot saved as \"{}\"", filename.display()),
                    Err(e) => errors.push(format!(
                        "screenshot write to \"{}\" failed: {e}",
                        filename.display()
                    )),
                }
            });
        match spawned {
            Ok(_) => true,
            Err(e) => {
                self.errors.push(format!("screenshot thread spawn failed: {e}"));
                false
            }
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        let shared = self.shared.lock();
        RuntimeStatus {
            mode: shared.settings.mode,
            thresholds: shared.settings.thresholds,
            recording: self.is_recording(),
            last_trigger_time: shared.last_trigger_time,
            last_error: self.errors.last(),
            event_recording_enabled: shared.settings.event_recording_enabled,
            save_dir: shared.settings.save_dir.clone(),
        }
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorEntry> {
        self.errors.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ScriptedCamera;
    use frame_store::MemoryStore;
    use io_box::mock::{IoCounts, MockIoBackend};

    fn make_controller(dir: &std::path::Path) -> (Controller, Arc<IoCounts>) {
        let counts = Arc::new(IoCounts::default());
        let mut cfg = CamConfig::default();
        cfg.save_dir = dir.join("out");
        let camera = ScriptedCamera::new(30.0).unwrap();
        let ctrl = Controller::new(
            &cfg,
            dir.join("config.json"),
            Box::new(camera),
            Arc::new(MemoryStore::new()),
            Box::new(MockIoBackend::new(counts.clone())),
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
        )
        .unwrap();
        (ctrl, counts)
    }

    #[test]
    fn setters_clamp_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (ctrl, _) = make_controller(dir.path());
        assert!(ctrl.set_start_threshold(9999.0, "test"));
        assert!(ctrl.set_stop_threshold(-12.0, "test"));
        assert!(ctrl.set_post_event_duration(500.0, "test"));
        assert!(ctrl.set_manual_record_limit(9999.0, "test"));

        let status = ctrl.status();
        assert_eq!(status.thresholds.start, 250.0);
        assert_eq!(status.thresholds.stop, 0.0);

        // Changes were persisted to the config file.
        let cfg = config::load_config(dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.start_threshold, 250.0);
        assert_eq!(cfg.stop_threshold, 0.0);
        assert_eq!(cfg.post_event_duration, 180.0);
        assert_eq!(cfg.manual_record_limit, 3600.0);
    }

    #[test]
    fn fault_mode_rejects_everything_but_transitions_and_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let (ctrl, counts) = make_controller(dir.path());
        assert!(ctrl.set_mode(Mode::Fault, "test"));
        assert!(!ctrl.set_start_threshold(60.0, "test"));
        assert!(!ctrl.set_manual_record_limit(60.0, "test"));
        assert!(!ctrl.enable_event_recording("test"));
        assert!(!ctrl.trigger_buzzer());
        assert!(!ctrl.freeze_relay());
        assert_eq!(counts.buzzer.load(Ordering::SeqCst), 0);

        // Diagnostics and transitions still work.
        assert!(ctrl.recent_errors(10).is_empty());
        assert_eq!(ctrl.status().mode, Mode::Fault);
        assert!(ctrl.set_mode(Mode::Normal, "test"));
        assert!(ctrl.set_start_threshold(60.0, "test"));
    }

    #[test]
    fn actuator_pulses_only_in_test_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (ctrl, counts) = make_controller(dir.path());
        assert!(!ctrl.trigger_buzzer());
        assert!(!ctrl.set_relay(true));
        assert_eq!(counts.buzzer.load(Ordering::SeqCst), 0);

        ctrl.set_mode(Mode::Test, "test");
        assert!(ctrl.trigger_buzzer());
        assert!(ctrl.trigger_strobe());
        assert!(ctrl.set_relay(true));
        assert!(ctrl.io().relay_on());
        assert_eq!(counts.buzzer.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mode_times_out_to_normal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctrl, _) = make_controller(dir.path());
        ctrl.set_test_timeout(Duration::from_millis(30));
        ctrl.set_mode(Mode::Test, "test");
        ctrl.apply_test_timeout();
        assert_eq!(ctrl.mode(), Mode::Test);
        std::thread::sleep(Duration::from_millis(50));
        ctrl.apply_test_timeout();
        assert_eq!(ctrl.mode(), Mode::Normal);
    }

    #[test]
    fn detection_arming_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (ctrl, _) = make_controller(dir.path());
        {
            let shared = ctrl.shared.lock();
            assert!(Controller::detection_armed(&shared.settings));
        }
        ctrl.disable_event_recording("test");
        {
            let shared = ctrl.shared.lock();
            assert!(!Controller::detection_armed(&shared.settings));
        }
        ctrl.enable_event_recording("test");
        ctrl.set_mode(Mode::Test, "test");
        {
            let shared = ctrl.shared.lock();
            // Test mode simulates events only with EVENT recording type.
            assert!(Controller::detection_armed(&shared.settings));
        }
        ctrl.set_recording_type(RecordingKind::Manual, "test");
        {
            let shared = ctrl.shared.lock();
            assert!(!Controller::detection_armed(&shared.settings));
        }
    }
}
