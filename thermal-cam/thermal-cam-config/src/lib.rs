//! The persisted key/value configuration document for thermal-cam.
//!
//! The configuration is a JSON document loaded once at startup (a missing
//! file yields the built-in defaults) and rewritten atomically on every
//! administrative change.

use serde::{Deserialize, Serialize};

use thermal_cam_types::{Mode, RecordingKind};

/// The thermal-cam configuration error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup error on variable: {source}")]
    ShellExpandLookupVarError {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
    #[error("IO error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },
    #[error("atomic rewrite failed: {source}")]
    PersistError {
        #[from]
        source: tempfile::PersistError,
    },
    #[error("config path has no parent directory")]
    NoParentDir,
}

type Result<T> = std::result::Result<T, Error>;

/// The default post-event recording duration, seconds.
pub const DEFAULT_POST_EVENT_SECS: f64 = 5.0;
/// The default pre-event window fetched from the frame store, seconds.
pub const DEFAULT_PRE_EVENT_SECS: f64 = 10.0;
/// The default ceiling for manual recordings, seconds.
pub const DEFAULT_MANUAL_RECORD_LIMIT_SECS: f64 = 600.0;

/// Longest allowed post-event duration, seconds.
pub const POST_EVENT_MAX_SECS: f64 = 180.0;
/// Allowed range for the manual recording ceiling, seconds.
pub const MANUAL_RECORD_LIMIT_RANGE_SECS: (f64, f64) = (1.0, 3600.0);

/// Clamp a requested post-event duration to its documented bounds.
pub fn clamp_post_event_secs(value: f64) -> f64 {
    value.clamp(0.0, POST_EVENT_MAX_SECS)
}

/// Clamp a requested manual recording ceiling to its documented bounds.
pub fn clamp_manual_record_limit_secs(value: f64) -> f64 {
    let (lo, hi) = MANUAL_RECORD_LIMIT_RANGE_SECS;
    value.clamp(lo, hi)
}

fn default_start_threshold() -> f64 {
    50.0
}

fn default_stop_threshold() -> f64 {
    45.0
}

fn default_min_record_duration() -> f64 {
    10.0
}

fn default_pre_event_duration() -> f64 {
    DEFAULT_PRE_EVENT_SECS
}

fn default_post_event_duration() -> f64 {
    DEFAULT_POST_EVENT_SECS
}

fn default_manual_record_limit() -> f64 {
    DEFAULT_MANUAL_RECORD_LIMIT_SECS
}

/// The default save directory for video and screenshot artifacts.
pub const DEFAULT_SAVE_DIR: &str = "Output_data";

fn default_save_dir() -> std::path::PathBuf {
    DEFAULT_SAVE_DIR.into()
}

fn default_true() -> bool {
    true
}

/// The on-disk configuration document.
///
/// Field names are the recognized configuration keys. `duration` holds the
/// post-event recording duration in seconds; the name is kept for
/// compatibility with existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamConfig {
    /// Temperature above which an anomaly is raised, °C.
    #[serde(default = "default_start_threshold")]
    pub start_threshold: f64,
    /// Temperature below which an anomaly is considered cleared, °C.
    #[serde(default = "default_stop_threshold")]
    pub stop_threshold: f64,
    /// Minimum recording time, seconds.
    #[serde(default = "default_min_record_duration")]
    pub min_record_duration: f64,
    /// Length of the pre-event window stitched in front of anomaly videos,
    /// seconds.
    #[serde(default = "default_pre_event_duration")]
    pub pre_event_duration: f64,
    /// Post-event recording duration, seconds. Clamped to
    /// [0, [`POST_EVENT_MAX_SECS`]] when set administratively.
    #[serde(default = "default_post_event_duration", rename = "duration")]
    pub post_event_duration: f64,
    /// Hard ceiling for manual recordings, seconds. Clamped to
    /// [`MANUAL_RECORD_LIMIT_RANGE_SECS`] when set administratively.
    #[serde(default = "default_manual_record_limit")]
    pub manual_record_limit: f64,
    /// Directory for video and screenshot artifacts. May contain shell
    /// variables such as `~`, `$A`, or `${B}`.
    #[serde(default = "default_save_dir")]
    pub save_dir: std::path::PathBuf,
    /// EVENT or MANUAL.
    #[serde(default)]
    pub recording_type: RecordingKind,
    /// Whether event-triggered detection and recording is active.
    #[serde(default = "default_true")]
    pub event_recording_enabled: bool,
    /// Operating mode saved at the last administrative change.
    #[serde(default)]
    pub mode: Mode,
}

impl Default for CamConfig {
    fn default() -> Self {
        Self {
            start_threshold: default_start_threshold(),
            stop_threshold: default_stop_threshold(),
            min_record_duration: default_min_record_duration(),
            pre_event_duration: default_pre_event_duration(),
            post_event_duration: default_post_event_duration(),
            manual_record_limit: default_manual_record_limit(),
            save_dir: default_save_dir(),
            recording_type: RecordingKind::default(),
            event_recording_enabled: true,
            mode: Mode::default(),
        }
    }
}

impl CamConfig {
    /// Expand shell variables in `save_dir`.
    fn fixup_save_dir(&mut self) -> Result<()> {
        let pathstr = self.save_dir.to_string_lossy().to_string();
        let expanded = shellexpand::full(&pathstr)?;
        self.save_dir = std::path::PathBuf::from(expanded.to_string());
        Ok(())
    }
}

/// Load the configuration from `path`, falling back to the built-in defaults
/// when the file does not exist.
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<CamConfig> {
    let path = path.as_ref();
    let mut cfg: CamConfig = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)?
    } else {
        tracing::info!(
            "config file \"{}\" not found, using defaults",
            path.display()
        );
        CamConfig::default()
    };
    cfg.fixup_save_dir()?;
    tracing::info!("config loaded from \"{}\"", path.display());
    Ok(cfg)
}

/// Atomically rewrite the configuration at `path`.
///
/// The document is serialized into a temporary file in the same directory and
/// renamed over the target, so a crash mid-write never leaves a truncated
/// config behind.
pub fn save_config<P: AsRef<std::path::Path>>(cfg: &CamConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) => std::path::PathBuf::from("."),
        None => return Err(Error::NoParentDir),
    };
    let contents = serde_json::to_string_pretty(cfg)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path)?;
    tracing::info!("config saved to \"{}\"", path.display());
    Ok(())
}
