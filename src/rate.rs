//! Keeps a loop from running faster than a target frequency.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Returned for a frequency that is not a positive, finite number of Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidFrequency(pub f64);

impl fmt::Display for InvalidFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frequency should be a positive number of Hz, got {}", self.0)
    }
}

impl std::error::Error for InvalidFrequency {}

/// Blocks a loop until its next scheduled tick.
///
/// Ticks are scheduled against absolute deadlines, so the time spent
/// oversleeping on one tick is taken out of the next one and the average
/// period converges to `1 / frequency`. When a tick runs late, the schedule
/// is re-anchored on the current time rather than catching up with a burst of
/// short ticks.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    period: Duration,
    next_tick: Instant,
}

impl RateGovernor {
    /// A governor for the given frequency in Hz. The first tick is scheduled
    /// one period after construction.
    pub fn new(frequency: f64) -> Result<Self, InvalidFrequency> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(InvalidFrequency(frequency));
        }
        let period = Duration::from_secs_f64(1.0 / frequency);
        Ok(RateGovernor {
            period,
            next_tick: Instant::now() + period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Schedules the next tick one period from now.
    pub fn reset(&mut self) {
        self.next_tick = Instant::now() + self.period;
    }

    /// Sleeps until the next tick. Returns immediately if it is already due.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next_tick {
            spin_sleep::sleep(self.next_tick - now);
            self.next_tick += self.period;
        } else {
            self.next_tick = now + self.period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_from_frequency() {
        let governor = RateGovernor::new(200.0).unwrap();
        assert_eq!(governor.period(), Duration::from_millis(5));
    }

    #[test]
    fn invalid_frequencies_are_refused() {
        assert_eq!(RateGovernor::new(0.0).unwrap_err(), InvalidFrequency(0.0));
        assert!(RateGovernor::new(-5.0).is_err());
        assert!(RateGovernor::new(f64::NAN).is_err());
        assert!(RateGovernor::new(f64::INFINITY).is_err());
    }

    #[test]
    fn converges_to_frequency() {
        let frequency = 200.0;
        let ticks = 40;
        let mut governor = RateGovernor::new(frequency).unwrap();
        let start = Instant::now();
        for _ in 0..ticks {
            governor.wait();
        }
        let elapsed = start.elapsed().as_secs_f64();
        let expected = ticks as f64 / frequency;
        assert!(elapsed >= expected - 1.0 / frequency, "elapsed {elapsed}");
        assert!(elapsed < expected + 0.1, "elapsed {elapsed}");
    }

    #[test]
    fn late_tick_does_not_burst() {
        let mut governor = RateGovernor::new(100.0).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // due long ago: returns at once
        let start = Instant::now();
        governor.wait();
        assert!(start.elapsed() < Duration::from_millis(5));
        // but the one after is a full period away again
        let start = Instant::now();
        governor.wait();
        assert!(start.elapsed() >= Duration::from_millis(9));
    }
}
