//! Camera capability contract and the simulated backend.
//!
//! The real sensor SDK lives behind [`ThermalCamera`]; concrete backends are
//! substituted at startup. The simulated backend produces synthetic frames
//! with a scriptable temperature source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub type Result<T> = std::result::Result<T, CameraError>;

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("acquisition failed: {0}")]
    Acquisition(String),
    #[error("frame encoding failed: {source}")]
    Encode {
        #[from]
        source: image::ImageError,
    },
}

/// One acquisition: an encoded image plus the scalar temperature reading.
#[derive(Debug, Clone)]
pub struct Capture {
    /// JPEG bytes. Empty means the sensor delivered an invalid frame.
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Scene temperature, °C.
    pub temperature: f64,
}

/// Capability contract for the sensor/frame acquisition device.
pub trait ThermalCamera: Send {
    fn grab(&mut self) -> Result<Capture>;
    fn shutdown(&mut self);
}

/// Default sensor resolution of the simulated device.
pub const SIM_WIDTH: u32 = 160;
pub const SIM_HEIGHT: u32 = 120;

fn encode_gray(raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new(&mut jpeg);
    encoder.encode(raw, width, height, image::ExtendedColorType::L8)?;
    Ok(jpeg)
}

/// Placeholder substituted for the live image when acquisition fails.
pub fn placeholder_frame() -> (Vec<u8>, u32, u32) {
    let raw = vec![16u8; (SIM_WIDTH * SIM_HEIGHT) as usize];
    match encode_gray(&raw, SIM_WIDTH, SIM_HEIGHT) {
        Ok(jpeg) => (jpeg, SIM_WIDTH, SIM_HEIGHT),
        Err(e) => {
            // A placeholder that fails to encode leaves only an empty image.
            tracing::warn!("placeholder frame encoding failed: {e}");
            (Vec::new(), SIM_WIDTH, SIM_HEIGHT)
        }
    }
}

/// Shared handle to poke the simulated camera from outside the capture loop.
#[derive(Clone, Default)]
pub struct SimulatedCameraHandle {
    spike_pending: Arc<AtomicBool>,
}

impl SimulatedCameraHandle {
    /// Make the next reading an anomaly-range temperature (55–65 °C).
    pub fn trigger_anomaly(&self) {
        self.spike_pending.store(true, Ordering::SeqCst);
        tracing::info!("anomaly spike scheduled on simulated camera");
    }
}

/// Simulated sensor: synthetic grayscale frames, random in-range
/// temperatures, one-shot anomaly spikes on request.
pub struct SimulatedCamera {
    rng: StdRng,
    handle: SimulatedCameraHandle,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            handle: SimulatedCameraHandle::default(),
        }
    }

    pub fn handle(&self) -> SimulatedCameraHandle {
        self.handle.clone()
    }
}

impl ThermalCamera for SimulatedCamera {
    fn grab(&mut self) -> Result<Capture> {
        let temperature: f64 = if self.handle.spike_pending.swap(false, Ordering::SeqCst) {
            self.rng.random_range(55.0..65.0)
        } else {
            self.rng.random_range(20.0..48.0)
        };
        // Brightness tracks the reported temperature so frames are
        // distinguishable when reviewing a clip.
        let base = ((temperature / 100.0) * 255.0).clamp(0.0, 255.0) as u8;
        let mut raw = vec![0u8; (SIM_WIDTH * SIM_HEIGHT) as usize];
        for (i, px) in raw.iter_mut().enumerate() {
            let x = (i as u32 % SIM_WIDTH) as u8;
            *px = base.saturating_add(x / 4);
        }
        let jpeg = encode_gray(&raw, SIM_WIDTH, SIM_HEIGHT)?;
        Ok(Capture {
            jpeg,
            width: SIM_WIDTH,
            height: SIM_HEIGHT,
            temperature,
        })
    }

    fn shutdown(&mut self) {
        tracing::info!("simulated camera released");
    }
}

/// Externally scripted camera: the test sets the temperature and the failure
/// toggle; every grab reports the current values with a fixed frame.
#[derive(Clone, Default)]
pub struct ScriptedCameraHandle {
    inner: Arc<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    temperature_milli: std::sync::atomic::AtomicI64,
    failing: AtomicBool,
}

impl ScriptedCameraHandle {
    pub fn set_temperature(&self, deg_c: f64) {
        self.inner
            .temperature_milli
            .store((deg_c * 1000.0) as i64, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }
}

pub struct ScriptedCamera {
    handle: ScriptedCameraHandle,
    frame: Vec<u8>,
}

impl ScriptedCamera {
    pub fn new(initial_deg_c: f64) -> Result<Self> {
        let handle = ScriptedCameraHandle::default();
        handle.set_temperature(initial_deg_c);
        let raw = vec![128u8; (SIM_WIDTH * SIM_HEIGHT) as usize];
        Ok(Self {
            handle,
            frame: encode_gray(&raw, SIM_WIDTH, SIM_HEIGHT)?,
        })
    }

    pub fn handle(&self) -> ScriptedCameraHandle {
        self.handle.clone()
    }
}

impl ThermalCamera for ScriptedCamera {
    fn grab(&mut self) -> Result<Capture> {
        if self.handle.inner.failing.load(Ordering::SeqCst) {
            return Err(CameraError::Acquisition("scripted failure".into()));
        }
        let temperature =
            self.handle.inner.temperature_milli.load(Ordering::SeqCst) as f64 / 1000.0;
        Ok(Capture {
            jpeg: self.frame.clone(),
            width: SIM_WIDTH,
            height: SIM_HEIGHT,
            temperature,
        })
    }

    fn shutdown(&mut self) {}
}
