//! Append-only CSV audit trail, one row per capture tick.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use thermal_cam_types::Mode;

use crate::Result;

/// One audit row. `temperature` is `None` when the tick had no valid
/// reading; it is logged as `N/A`.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub timestamp: DateTime<Utc>,
    pub mode: Mode,
    pub temperature: Option<f64>,
    pub recording: bool,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Open (or create) the audit file, writing the header row only when the
    /// file is new.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let needs_header = !path.exists();
        if needs_header {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut wtr = csv::Writer::from_writer(file);
            wtr.write_record(["timestamp", "mode", "temperature", "recording"])?;
            wtr.flush()?;
        }
        Ok(Self { path })
    }

    pub fn append(&self, row: &AuditRow) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let temperature = match row.temperature {
            Some(t) => format!("{t:.2}"),
            None => "N/A".to_string(),
        };
        wtr.write_record([
            row.timestamp.to_rfc3339(),
            row.mode.to_string(),
            temperature,
            row.recording.to_string(),
        ])?;
        wtr.flush()?;
        Ok(())
    }
}
