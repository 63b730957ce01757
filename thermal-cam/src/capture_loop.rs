//! The capture loop: one tick per frame.
//!
//! Each tick grabs a frame, feeds the store and the audit trail, runs the
//! hysteresis detector, and schedules the single-flight anomaly worker. The
//! loop itself never records video; workers and manual sessions do.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

use frame_store::FrameRecord;
use thermal_cam_types::Mode;

use crate::audit::{AuditLog, AuditRow};
use crate::camera::placeholder_frame;
use crate::controller::{Controller, LastFrame};
use crate::detector::HysteresisDetector;
use crate::{worker, Result};

/// Default pacing of the loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(30);

/// How long shutdown waits for an in-flight worker before abandoning it.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CaptureLoop {
    ctrl: Arc<Controller>,
    detector: HysteresisDetector,
    audit: AuditLog,
    worker: Option<JoinHandle<()>>,
    tick_interval: Duration,
}

impl CaptureLoop {
    pub fn new(ctrl: Arc<Controller>, audit: AuditLog) -> Self {
        Self {
            ctrl,
            detector: HysteresisDetector::new(),
            audit,
            worker: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.ctrl
    }

    /// Whether an anomaly worker is currently in flight.
    pub fn worker_active(&self) -> bool {
        self.worker.is_some()
    }

    /// One pass of the control loop. Public so tests can drive the loop
    /// deterministically.
    pub fn tick(&mut self) {
        self.ctrl.apply_test_timeout();

        let (jpeg, width, height, temperature) = self.acquire();
        let now = Utc::now();

        if !jpeg.is_empty() {
            self.ctrl.store.insert(FrameRecord {
                timestamp: now,
                image: jpeg.clone(),
            });
            self.ctrl.shared.lock().last_frame = Some(LastFrame {
                jpeg,
                width,
                height,
            });
        }

        let (mode, thresholds, armed) = {
            let shared = self.ctrl.shared.lock();
            (
                shared.settings.mode,
                shared.settings.thresholds,
                Controller::detection_armed(&shared.settings),
            )
        };
        let recording = self.ctrl.is_recording();

        if let Err(e) = self.audit.append(&AuditRow {
            timestamp: now,
            mode,
            temperature,
            recording,
        }) {
            tracing::warn!("audit append failed: {e}");
        }

        if let Some(temperature) = temperature {
            if armed {
                if let Some(event) = self.detector.observe(temperature, &thresholds, recording) {
                    tracing::info!(
                        "anomaly raised at {:.1}C (start {:.1}C)",
                        event.temperature,
                        thresholds.start
                    );
                    self.ctrl.enqueue_event(event);
                    self.ctrl.io().trigger_buzzer();
                    self.ctrl.io().trigger_strobe();
                    self.ctrl.io().set_relay(true);
                }
            }
            tracing::debug!(
                "{}",
                overlay_text(mode, Some(temperature), recording, self.worker.is_some())
            );
        } else {
            tracing::debug!("{}", overlay_text(mode, None, recording, false));
        }

        self.reap_workers();
        self.maybe_start_worker();
    }

    /// Run until shutdown is requested.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!("capture loop running");
        while !self.ctrl.is_shutdown() {
            let started = Instant::now();
            self.tick();
            let elapsed = started.elapsed();
            if let Some(remainder) = self.tick_interval.checked_sub(elapsed) {
                std::thread::sleep(remainder);
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Grab one frame. Acquisition failure trips Fault mode and substitutes
    /// the placeholder image with no temperature reading.
    fn acquire(&mut self) -> (Vec<u8>, u32, u32, Option<f64>) {
        let grabbed = self.ctrl.camera.lock().grab();
        match grabbed {
            Ok(capture) if !capture.jpeg.is_empty() => (
                capture.jpeg,
                capture.width,
                capture.height,
                Some(capture.temperature),
            ),
            Ok(_) => {
                self.fault("camera delivered an invalid frame");
                let (jpeg, w, h) = placeholder_frame();
                (jpeg, w, h, None)
            }
            Err(e) => {
                self.fault(format!("frame acquisition failed: {e}"));
                let (jpeg, w, h) = placeholder_frame();
                (jpeg, w, h, None)
            }
        }
    }

    fn fault(&self, message: impl Into<String>) {
        self.ctrl.errors.push(message);
        if self.ctrl.mode() != Mode::Fault {
            self.ctrl.set_mode(Mode::Fault, "capture loop");
        }
    }

    /// Collect a finished worker and drop the relay back to OFF.
    fn reap_workers(&mut self) {
        if matches!(&self.worker, Some(h) if h.is_finished()) {
            if let Some(handle) = self.worker.take() {
                if handle.join().is_err() {
                    self.ctrl.errors.push("anomaly worker panicked");
                }
                self.ctrl.io().set_relay(false);
            }
        }
        self.ctrl.reap_manual();
    }

    /// Pop at most one queued event and start its worker. Single-flight: a
    /// second event waits until the current worker finishes and the shared
    /// recording flag is free again.
    fn maybe_start_worker(&mut self) {
        if self.worker.is_some() || self.ctrl.events_rx.is_empty() {
            return;
        }
        let guard = match self.ctrl.recording.try_acquire() {
            Some(g) => g,
            None => return,
        };
        let event = match self.ctrl.events_rx.try_recv() {
            Ok(e) => e,
            Err(_) => return,
        };
        match worker::spawn(self.ctrl.clone(), guard, event) {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.ctrl
                    .errors
                    .push(format!("anomaly worker spawn failed: {e}"));
            }
        }
    }

    /// Orderly teardown: stop recordings, wait briefly for the worker, then
    /// release the camera and the store.
    pub fn shutdown(&mut self) {
        tracing::info!("capture loop shutting down");
        self.ctrl.stop_manual_recording();
        if let Some(handle) = self.worker.take() {
            let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    self.ctrl.errors.push("anomaly worker panicked");
                }
            } else {
                tracing::warn!("anomaly worker did not stop in time");
            }
        }
        self.ctrl.camera.lock().shutdown();
        self.ctrl.store.close();
    }
}

/// Status line rendered onto live frames and the debug log.
pub fn overlay_text(
    mode: Mode,
    temperature: Option<f64>,
    recording: bool,
    anomaly_in_flight: bool,
) -> String {
    let temp = match temperature {
        Some(t) => format!("{t:.1}C"),
        None => "N/A".to_string(),
    };
    let rec = match (recording, anomaly_in_flight) {
        (true, true) => "REC(anomaly)",
        (true, false) => "REC",
        _ => "idle",
    };
    format!("mode={mode} temp={temp} {rec}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_formats_missing_temperature() {
        assert_eq!(
            overlay_text(Mode::Fault, None, false, false),
            "mode=Fault temp=N/A idle"
        );
        assert_eq!(
            overlay_text(Mode::Normal, Some(51.24), true, true),
            "mode=Normal temp=51.2C REC(anomaly)"
        );
    }
}
