//! Shared plain types for the thermal-cam monitoring system.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lower bound for both thresholds, in °C.
pub const TEMP_MIN: f64 = 0.0;
/// Upper bound for both thresholds, in °C.
pub const TEMP_MAX: f64 = 250.0;

/// Number of entries kept in the user-visible error history.
pub const ERROR_HISTORY_LIMIT: usize = 50;

/// Operating mode of the whole system.
///
/// Mutated only through the controller's `set_mode` operation, which persists
/// the configuration on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Normal,
    Test,
    Fault,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Normal
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Normal => "Normal",
            Mode::Test => "Test",
            Mode::Fault => "Fault",
        };
        write!(f, "{}", s)
    }
}

/// Which kind of recording the system is configured to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingKind {
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl Default for RecordingKind {
    fn default() -> Self {
        RecordingKind::Event
    }
}

impl std::fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingKind::Event => "Event",
            RecordingKind::Manual => "Manual",
        };
        write!(f, "{}", s)
    }
}

/// The hysteresis threshold pair, in °C.
///
/// An anomaly is raised when the temperature crosses above `start` and is
/// considered cleared only once it falls below `stop`. The expected operating
/// configuration is `stop <= start`; this is not enforced, matching the
/// deployed system. Both values are clamped to [`TEMP_MIN`], [`TEMP_MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub start: f64,
    pub stop: f64,
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self {
            start: 50.0,
            stop: 45.0,
        }
    }
}

impl ThresholdPair {
    pub fn clamp_temperature(value: f64) -> f64 {
        value.clamp(TEMP_MIN, TEMP_MAX)
    }
}

/// A detected over-temperature condition. Immutable after creation, consumed
/// exactly once by the anomaly worker.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyEvent {
    /// Temperature at the instant the anomaly was raised, in °C.
    pub temperature: f64,
    pub raised_at: DateTime<Utc>,
}

/// One user-visible failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Bounded ring of user-visible failures, oldest evicted first.
///
/// Shared between the control loop, the actuator gateway and the worker
/// threads, so the lock lives inside.
#[derive(Debug, Default)]
pub struct ErrorHistory {
    inner: Mutex<VecDeque<ErrorEntry>>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure both in the system log and in the user-visible ring.
    pub fn push<S: Into<String>>(&self, message: S) {
        let message = message.into();
        tracing::error!("{}", message);
        let mut inner = self.inner.lock();
        if inner.len() >= ERROR_HISTORY_LIMIT {
            inner.pop_front();
        }
        inner.push_back(ErrorEntry {
            timestamp: Utc::now(),
            message,
        });
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorEntry> {
        let inner = self.inner.lock();
        let skip = inner.len().saturating_sub(limit);
        inner.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<ErrorEntry> {
        self.inner.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Read-only snapshot of the running system, exposed to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub mode: Mode,
    pub thresholds: ThresholdPair,
    pub recording: bool,
    pub last_trigger_time: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorEntry>,
    pub event_recording_enabled: bool,
    pub save_dir: PathBuf,
}
