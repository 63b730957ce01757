//! The shared recording flag.
//!
//! Both the anomaly worker and the manual recording controller must hold the
//! flag while recording. Acquisition is an atomic check-and-set returning a
//! guard whose `Drop` clears the flag, so no exit path can leave it stuck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct RecordingFlag(Arc<AtomicBool>);

impl RecordingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Atomically claim the flag. `None` when a recording is already active.
    pub fn try_acquire(&self) -> Option<RecordingGuard> {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RecordingGuard(self.0.clone()))
    }
}

pub struct RecordingGuard(Arc<AtomicBool>);

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
