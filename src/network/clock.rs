use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation-wide elapsed time in seconds.
///
/// Advanced only by completed chunk transfers and never tied to wall-clock
/// time. It only moves forward.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct VirtualClock(f64);

impl VirtualClock {
    pub fn new() -> Self {
        Self(0.0)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    pub fn as_millis(&self) -> f64 {
        self.0 * 1_000.0
    }

    /// Move the clock forward. Negative and non-finite amounts are ignored.
    pub fn advance(&mut self, secs: f64) {
        if secs.is_finite() && secs > 0.0 {
            self.0 += secs;
        }
    }
}

impl fmt::Display for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let mut clock = VirtualClock::new();
        clock.advance(0.5);
        clock.advance(-1.0);
        clock.advance(f64::NAN);
        clock.advance(f64::INFINITY);
        clock.advance(0.25);

        assert_eq!(clock.as_secs(), 0.75);
        assert_eq!(clock.as_millis(), 750.0);
        assert_eq!(clock.to_string(), "0.7500s");
    }
}
