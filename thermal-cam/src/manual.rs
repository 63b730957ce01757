//! Operator-initiated manual recording.
//!
//! A manual session runs on its own thread sampling live frames into a
//! timestamped AVI. It holds the shared recording flag for its whole
//! lifetime, so anomaly videos and manual videos never overlap.

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

use avi_writer::AviWriter;

use crate::controller::Controller;
use crate::recording::RecordingGuard;
use crate::worker::{frame_dimensions, SAMPLE_FPS};

/// How long `stop_manual_recording` waits for the session thread to wind
/// down before abandoning the join.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) struct ManualSession {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ManualSession {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Controller {
    /// Start a manual recording of up to `requested` (clamped to the
    /// configured ceiling). `false` when another recording is active, the
    /// mode is Fault, or the camera has produced no frames yet.
    pub fn start_manual_recording(self: &Arc<Self>, requested: Duration) -> bool {
        let (limit, save_dir) = {
            let shared = self.shared.lock();
            if shared.settings.mode == thermal_cam_types::Mode::Fault {
                return false;
            }
            (shared.settings.manual_limit, shared.settings.save_dir.clone())
        };
        let duration = requested.min(limit);

        let mut slot = self.manual.lock();
        if slot.is_some() {
            tracing::warn!("manual recording refused: session already active");
            return false;
        }
        let guard = match self.recording.try_acquire() {
            Some(g) => g,
            None => {
                tracing::warn!("manual recording refused: another recording is active");
                return false;
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let ctrl = self.clone();
        let stop2 = stop.clone();
        let spawned = std::thread::Builder::new()
            .name("manual-record".to_string())
            .spawn(move || {
                record_session(ctrl, guard, save_dir, duration, stop2);
            });
        match spawned {
            Ok(handle) => {
                tracing::info!(
                    "manual recording started, limit {:.1}s",
                    duration.as_secs_f64()
                );
                *slot = Some(ManualSession { stop, handle });
                true
            }
            Err(e) => {
                self.errors
                    .push(format!("manual recording thread spawn failed: {e}"));
                false
            }
        }
    }

    /// Stop the active manual session, waiting briefly for the file to be
    /// finalized. `false` when no session is active.
    pub fn stop_manual_recording(&self) -> bool {
        let session = match self.manual.lock().take() {
            Some(s) => s,
            None => return false,
        };
        session.request_stop();
        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !session.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if session.is_finished() {
            if session.handle.join().is_err() {
                self.errors.push("manual recording thread panicked");
            }
        } else {
            tracing::warn!("manual recording thread did not stop in time");
        }
        true
    }

    /// Collect a session that ran to its duration limit on its own.
    pub(crate) fn reap_manual(&self) {
        let finished = {
            let slot = self.manual.lock();
            matches!(&*slot, Some(s) if s.is_finished())
        };
        if !finished {
            return;
        }
        if let Some(session) = self.manual.lock().take() {
            if session.handle.join().is_err() {
                self.errors.push("manual recording thread panicked");
            }
        }
    }

    pub fn manual_recording_active(&self) -> bool {
        self.manual.lock().is_some()
    }
}

/// Body of the manual recording thread. The guard is dropped on every exit
/// path, releasing the shared flag.
fn record_session(
    ctrl: Arc<Controller>,
    guard: RecordingGuard,
    save_dir: std::path::PathBuf,
    duration: Duration,
    stop: Arc<AtomicBool>,
) {
    let _guard = guard;
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    let path = save_dir.join(format!("thermal_video_{ts}.avi"));

    let (width, height) = match frame_dimensions(&ctrl) {
        Some(dims) => dims,
        None => {
            ctrl.errors.push("manual recording aborted: no frame yet");
            return;
        }
    };
    let file = match File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            ctrl.errors
                .push(format!("cannot create \"{}\": {e}", path.display()));
            return;
        }
    };
    let mut writer = match AviWriter::new(BufWriter::new(file), width, height, SAMPLE_FPS) {
        Ok(w) => w,
        Err(e) => {
            ctrl.errors
                .push(format!("video writer init failed for \"{}\": {e}", path.display()));
            return;
        }
    };

    let frame_interval = Duration::from_secs_f64(1.0 / SAMPLE_FPS as f64);
    let deadline = Instant::now() + duration;
    let mut frames = 0usize;
    while Instant::now() < deadline
        && !stop.load(Ordering::SeqCst)
        && !ctrl.is_shutdown()
    {
        let capture = match ctrl.camera.lock().grab() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("manual recording frame grab failed: {e}");
                std::thread::sleep(frame_interval);
                continue;
            }
        };
        if !capture.jpeg.is_empty() {
            if let Err(e) = writer.write_frame(&capture.jpeg) {
                ctrl.errors
                    .push(format!("video write to \"{}\" failed: {e}", path.display()));
                return;
            }
            frames += 1;
        }
        std::thread::sleep(frame_interval);
    }

    match writer.finish() {
        Ok(_) => tracing::info!(
            "manual recording saved as \"{}\" ({frames} frames)",
            path.display()
        ),
        Err(e) => ctrl
            .errors
            .push(format!("video finalize of \"{}\" failed: {e}", path.display())),
    }
}
