//! Hysteresis-based over-temperature detector.

use chrono::Utc;

use thermal_cam_types::{AnomalyEvent, ThresholdPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Active,
}

/// Two-threshold state machine with a single-flight guarantee.
///
/// A new event is raised on the Idle → Active transition only; while Active,
/// repeated over-threshold readings raise nothing. The machine returns to
/// Idle once the temperature drops below the stop threshold *and* no
/// recording is in progress, so an event is never cleared mid-recording.
pub struct HysteresisDetector {
    state: DetectorState,
}

impl Default for HysteresisDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HysteresisDetector {
    pub fn new() -> Self {
        Self {
            state: DetectorState::Idle,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == DetectorState::Active
    }

    /// Inspect one temperature sample.
    pub fn observe(
        &mut self,
        temperature: f64,
        thresholds: &ThresholdPair,
        recording_active: bool,
    ) -> Option<AnomalyEvent> {
        match self.state {
            DetectorState::Idle => {
                if temperature > thresholds.start {
                    self.state = DetectorState::Active;
                    return Some(AnomalyEvent {
                        temperature,
                        raised_at: Utc::now(),
                    });
                }
                None
            }
            DetectorState::Active => {
                if temperature < thresholds.stop && !recording_active {
                    self.state = DetectorState::Idle;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ThresholdPair {
        ThresholdPair {
            start: 50.0,
            stop: 45.0,
        }
    }

    fn feed(detector: &mut HysteresisDetector, temps: &[f64]) -> usize {
        temps
            .iter()
            .filter(|t| detector.observe(**t, &thresholds(), false).is_some())
            .count()
    }

    #[test]
    fn one_event_while_continuously_above_stop() {
        let mut d = HysteresisDetector::new();
        // Crosses start once, then stays above stop the whole time.
        let events = feed(&mut d, &[30.0, 55.0, 60.0, 52.0, 47.0, 46.0, 70.0]);
        assert_eq!(events, 1);
        assert!(d.is_active());
    }

    #[test]
    fn oscillation_between_stop_and_start_fires_nothing() {
        let mut d = HysteresisDetector::new();
        assert_eq!(feed(&mut d, &[55.0]), 1);
        // Noisy readings around the start threshold must not re-trigger.
        assert_eq!(feed(&mut d, &[49.0, 51.0, 46.0, 49.9, 51.0]), 0);
        assert!(d.is_active());
    }

    #[test]
    fn new_event_after_full_drop_below_stop() {
        let mut d = HysteresisDetector::new();
        assert_eq!(feed(&mut d, &[55.0]), 1);
        assert_eq!(feed(&mut d, &[44.0]), 0);
        assert_eq!(d.state(), DetectorState::Idle);
        assert_eq!(feed(&mut d, &[51.0]), 1);
    }

    #[test]
    fn recording_blocks_clearing() {
        let mut d = HysteresisDetector::new();
        assert!(d.observe(55.0, &thresholds(), false).is_some());
        // Below stop, but a recording is still running.
        assert!(d.observe(44.0, &thresholds(), true).is_none());
        assert!(d.is_active());
        // Once the recording ends the same reading clears the state.
        assert!(d.observe(44.0, &thresholds(), false).is_none());
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn exact_threshold_does_not_trigger() {
        let mut d = HysteresisDetector::new();
        assert!(d.observe(50.0, &thresholds(), false).is_none());
        assert!(d.observe(50.1, &thresholds(), false).is_some());
    }
}
