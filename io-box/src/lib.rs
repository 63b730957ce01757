//! Gateway to the physical alarm actuators: buzzer, strobe and relay.
//!
//! All actuator calls go through a uniform [`RetryPolicy`]. The relay
//! additionally honors a "frozen" operator override which rejects state
//! changes without consuming any retry attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use thermal_cam_types::ErrorHistory;

pub mod mock;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("actuator backend error: {0}")]
    Backend(String),
    #[error("io error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

/// Capability contract for the physical actuator driver.
///
/// Backends return `Ok(false)` when the hardware reports a refused command
/// and `Err(_)` on transient driver failures; the gateway treats both as a
/// failed attempt.
pub trait IoBackend: Send {
    fn trigger_buzzer(&mut self) -> Result<bool>;
    fn trigger_strobe(&mut self) -> Result<bool>;
    fn set_relay(&mut self, on: bool) -> Result<bool>;
}

/// Driver backend for hardware reached over the system log only.
///
/// Stands in for the GPIO driver on hosts without the alarm hardware
/// attached; every command succeeds.
pub struct LogIoBackend;

impl IoBackend for LogIoBackend {
    fn trigger_buzzer(&mut self) -> Result<bool> {
        tracing::info!("buzzer triggered");
        Ok(true)
    }

    fn trigger_strobe(&mut self) -> Result<bool> {
        tracing::info!("strobe triggered");
        Ok(true)
    }

    fn set_relay(&mut self, on: bool) -> Result<bool> {
        tracing::info!("relay set to {}", if on { "ON" } else { "OFF" });
        Ok(true)
    }
}

/// Uniform retry policy applied to every actuator call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `action` until it succeeds or the attempts are exhausted.
    ///
    /// Every failed attempt is logged; exhaustion records exactly one
    /// user-visible error entry and returns `false`.
    pub fn run<F>(&self, name: &str, errors: &ErrorHistory, mut action: F) -> bool
    where
        F: FnMut() -> Result<bool>,
    {
        for attempt in 1..=self.attempts {
            match action() {
                Ok(true) => {
                    tracing::info!("{name} succeeded on attempt {attempt}");
                    return true;
                }
                Ok(false) => {
                    tracing::warn!("{name} failed on attempt {attempt}, retrying");
                }
                Err(e) => {
                    tracing::warn!("{name} error on attempt {attempt}: {e}");
                }
            }
            if attempt < self.attempts {
                std::thread::sleep(self.delay);
            }
        }
        errors.push(format!("{name} failed after {} attempts", self.attempts));
        false
    }
}

/// The retrying actuator gateway.
pub struct IoGateway {
    backend: Mutex<Box<dyn IoBackend>>,
    policy: RetryPolicy,
    errors: Arc<ErrorHistory>,
    frozen: AtomicBool,
    relay_on: AtomicBool,
}

impl IoGateway {
    pub fn new(backend: Box<dyn IoBackend>, policy: RetryPolicy, errors: Arc<ErrorHistory>) -> Self {
        Self {
            backend: Mutex::new(backend),
            policy,
            errors,
            frozen: AtomicBool::new(false),
            relay_on: AtomicBool::new(false),
        }
    }

    /// Idempotent pulse; no persistent state.
    pub fn trigger_buzzer(&self) -> bool {
        self.policy.run("buzzer trigger", &self.errors, || {
            self.backend.lock().trigger_buzzer()
        })
    }

    /// Idempotent pulse; no persistent state.
    pub fn trigger_strobe(&self) -> bool {
        self.policy.run("strobe trigger", &self.errors, || {
            self.backend.lock().trigger_strobe()
        })
    }

    /// Command the relay state. When frozen, this is a no-op returning
    /// `false` without consuming a retry attempt.
    pub fn set_relay(&self, on: bool) -> bool {
        if self.frozen.load(Ordering::SeqCst) {
            tracing::info!("relay change to {} rejected: relay is frozen", on);
            return false;
        }
        let name = if on { "relay on" } else { "relay off" };
        let ok = self.policy.run(name, &self.errors, || {
            self.backend.lock().set_relay(on)
        });
        if ok {
            self.relay_on.store(on, Ordering::SeqCst);
        }
        ok
    }

    /// Operator safety override: reject all relay changes until unfrozen.
    pub fn freeze_relay(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        tracing::info!("relay state frozen");
    }

    pub fn unfreeze_relay(&self) {
        self.frozen.store(false, Ordering::SeqCst);
        tracing::info!("relay state unfrozen");
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Last successfully commanded relay state.
    pub fn relay_on(&self) -> bool {
        self.relay_on.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{IoCounts, MockIoBackend};
    use super::*;

    fn gateway(backend: MockIoBackend) -> (IoGateway, Arc<ErrorHistory>) {
        let errors = Arc::new(ErrorHistory::new());
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        (
            IoGateway::new(Box::new(backend), policy, errors.clone()),
            errors,
        )
    }

    #[test]
    fn success_on_first_attempt() {
        let counts = Arc::new(IoCounts::default());
        let (gw, errors) = gateway(MockIoBackend::new(counts.clone()));
        assert!(gw.trigger_buzzer());
        assert_eq!(counts.buzzer.load(Ordering::SeqCst), 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn retry_then_success() {
        let counts = Arc::new(IoCounts::default());
        let mut backend = MockIoBackend::new(counts.clone());
        backend.fail_strobe_attempts = 2;
        let (gw, errors) = gateway(backend);
        assert!(gw.trigger_strobe());
        assert_eq!(counts.strobe.load(Ordering::SeqCst), 3);
        assert!(errors.is_empty());
    }

    #[test]
    fn exhaustion_records_one_error_and_returns_false() {
        let counts = Arc::new(IoCounts::default());
        let mut backend = MockIoBackend::new(counts.clone());
        backend.fail_buzzer_attempts = u32::MAX;
        let (gw, errors) = gateway(backend);
        assert!(!gw.trigger_buzzer());
        // Exactly N attempts against the backend and exactly one
        // user-visible error entry.
        assert_eq!(counts.buzzer.load(Ordering::SeqCst), 3);
        assert_eq!(errors.len(), 1);
        assert!(errors.last().unwrap().message.contains("after 3 attempts"));
    }

    #[test]
    fn frozen_relay_rejects_without_attempts() {
        let counts = Arc::new(IoCounts::default());
        let (gw, errors) = gateway(MockIoBackend::new(counts.clone()));
        gw.freeze_relay();
        assert!(!gw.set_relay(true));
        assert_eq!(counts.relay.load(Ordering::SeqCst), 0);
        assert!(errors.is_empty());
        assert!(!gw.relay_on());

        gw.unfreeze_relay();
        assert!(gw.set_relay(true));
        assert!(gw.relay_on());
        assert_eq!(counts.relay.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn relay_state_not_updated_on_failure() {
        let counts = Arc::new(IoCounts::default());
        let mut backend = MockIoBackend::new(counts.clone());
        backend.fail_relay_attempts = u32::MAX;
        let (gw, _errors) = gateway(backend);
        assert!(!gw.set_relay(true));
        assert!(!gw.relay_on());
    }

    #[test]
    fn backend_errors_count_as_failed_attempts() {
        let counts = Arc::new(IoCounts::default());
        let mut backend = MockIoBackend::new(counts.clone());
        backend.fail_buzzer_attempts = u32::MAX;
        backend.error_buzzer = true;
        let (gw, errors) = gateway(backend);
        assert!(!gw.trigger_buzzer());
        assert_eq!(counts.buzzer.load(Ordering::SeqCst), 3);
        assert_eq!(errors.len(), 1);
    }
}
