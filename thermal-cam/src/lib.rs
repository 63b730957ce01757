//! Thermal anomaly monitoring: capture loop, hysteresis detection, event
//! and manual video recording, and the backend control surface.

pub mod audit;
pub mod camera;
pub mod capture_loop;
pub mod controller;
pub mod detector;
pub mod manual;
pub mod recording;
pub mod worker;

pub use audit::{AuditLog, AuditRow};
pub use camera::{Capture, ScriptedCamera, ScriptedCameraHandle, SimulatedCamera, ThermalCamera};
pub use capture_loop::{overlay_text, CaptureLoop, DEFAULT_TICK_INTERVAL};
pub use controller::{Controller, Settings, DEFAULT_TEST_TIMEOUT};
pub use detector::{DetectorState, HysteresisDetector};
pub use recording::{RecordingFlag, RecordingGuard};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("config error: {source}")]
    Config {
        #[from]
        source: thermal_cam_config::Error,
    },
    #[error("camera error: {source}")]
    Camera {
        #[from]
        source: camera::CameraError,
    },
    #[error("video container error: {source}")]
    Avi {
        #[from]
        source: avi_writer::Error,
    },
    #[error("csv error: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
}

/// Install the process-wide tracing subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
