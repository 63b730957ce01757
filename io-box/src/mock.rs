//! Scriptable actuator backend for tests and hardware-less hosts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::{Error, IoBackend, Result};

/// Attempt counters shared with the test that scripted the backend.
#[derive(Debug, Default)]
pub struct IoCounts {
    pub buzzer: AtomicU32,
    pub strobe: AtomicU32,
    pub relay: AtomicU32,
}

/// Backend whose first `fail_*_attempts` calls per actuator fail.
///
/// With `error_*` set, failures surface as `Err(_)` instead of `Ok(false)`.
pub struct MockIoBackend {
    counts: Arc<IoCounts>,
    pub fail_buzzer_attempts: u32,
    pub fail_strobe_attempts: u32,
    pub fail_relay_attempts: u32,
    pub error_buzzer: bool,
    /// Relay state as last accepted by the fake hardware.
    pub relay_state: bool,
}

impl MockIoBackend {
    pub fn new(counts: Arc<IoCounts>) -> Self {
        Self {
            counts,
            fail_buzzer_attempts: 0,
            fail_strobe_attempts: 0,
            fail_relay_attempts: 0,
            error_buzzer: false,
            relay_state: false,
        }
    }

    fn attempt(counter: &AtomicU32, fail_attempts: u32) -> bool {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        n > fail_attempts
    }
}

impl IoBackend for MockIoBackend {
    fn trigger_buzzer(&mut self) -> Result<bool> {
        let ok = Self::attempt(&self.counts.buzzer, self.fail_buzzer_attempts);
        if !ok && self.error_buzzer {
            return Err(Error::Backend("buzzer driver fault".into()));
        }
        Ok(ok)
    }

    fn trigger_strobe(&mut self) -> Result<bool> {
        Ok(Self::attempt(&self.counts.strobe, self.fail_strobe_attempts))
    }

    fn set_relay(&mut self, on: bool) -> Result<bool> {
        let ok = Self::attempt(&self.counts.relay, self.fail_relay_attempts);
        if ok {
            self.relay_state = on;
        }
        Ok(ok)
    }
}
