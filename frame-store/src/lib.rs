//! Rolling time-indexed store of recent encoded frames.
//!
//! The capture loop appends one record per tick while worker threads read
//! time windows of pre-event footage, so the store must be safe for one
//! concurrent writer plus readers and must never block the writer for long.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// How far back frames are retained.
///
/// This comfortably covers the largest configurable pre-event window while
/// bounding memory use.
pub const RETENTION_SECS: i64 = 120;

/// One captured frame. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub timestamp: DateTime<Utc>,
    /// Encoded image bytes (JPEG).
    pub image: Vec<u8>,
}

/// Capability contract for the frame store backing policy.
pub trait FrameStore: Send + Sync {
    /// Append one record. Must not abort the caller; failures are logged.
    fn insert(&self, record: FrameRecord);

    /// All frames with `timestamp >= now - window_secs`, oldest first.
    /// Empty on no matches.
    fn frames_in_window(&self, window_secs: f64) -> Vec<FrameRecord>;

    /// Release any resources held by the store.
    fn close(&self);
}

/// In-memory ring pruned to [`RETENTION_SECS`] on every insert.
pub struct MemoryStore {
    inner: Mutex<VecDeque<FrameRecord>>,
    retention: TimeDelta,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention_secs(RETENTION_SECS)
    }

    pub fn with_retention_secs(retention_secs: i64) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            retention: TimeDelta::seconds(retention_secs),
        }
    }

    /// All frames with `timestamp >= cutoff`, oldest first.
    pub fn frames_since(&self, cutoff: DateTime<Utc>) -> Vec<FrameRecord> {
        let inner = self.inner.lock();
        inner
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl FrameStore for MemoryStore {
    fn insert(&self, record: FrameRecord) {
        let horizon = Utc::now() - self.retention;
        let mut inner = self.inner.lock();
        inner.push_back(record);
        while inner
            .front()
            .map(|r| r.timestamp < horizon)
            .unwrap_or(false)
        {
            inner.pop_front();
        }
    }

    fn frames_in_window(&self, window_secs: f64) -> Vec<FrameRecord> {
        let window = match TimeDelta::from_std(std::time::Duration::from_secs_f64(
            window_secs.max(0.0),
        )) {
            Ok(w) => w,
            Err(_) => {
                tracing::warn!("frame window of {window_secs} s out of range, returning nothing");
                return Vec::new();
            }
        };
        self.frames_since(Utc::now() - window)
    }

    fn close(&self) {
        let n = {
            let mut inner = self.inner.lock();
            let n = inner.len();
            inner.clear();
            n
        };
        tracing::debug!("frame store closed, dropped {n} retained frames");
    }
}
