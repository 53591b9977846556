use std::time::Duration;

use rand::Rng;

/// Jittered, saturating sequence of wait durations.
///
/// Each call to [`Backoff::next`] yields the base delay at the current
/// position plus a uniform jitter in `[-randomness/2, +randomness/2]`, then
/// advances the position until it sticks on the last base delay. [`Backoff::reset`]
/// rewinds to the first delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    delays: Vec<f64>,
    randomness: f64,
    delay_index: usize,
}

impl Backoff {
    /// Create a sequencer from base delays (in seconds) and a jitter magnitude
    pub fn new(delays: Vec<f64>, randomness: f64) -> Self {
        Self {
            delays,
            randomness,
            delay_index: 0,
        }
    }

    /// Next delay in seconds. May be negative when the jitter exceeds the base.
    pub fn next(&mut self) -> f64 {
        let base = self
            .delays
            .get(self.delay_index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(0.0);

        let half = self.randomness.abs() / 2.0;
        let jitter = if half > 0.0 {
            rand::thread_rng().gen_range(-half..=half)
        } else {
            0.0
        };

        self.delay_index = (self.delay_index + 1).min(self.delays.len().saturating_sub(1));
        base + jitter
    }

    /// Next delay as a sleepable duration, clamped to `[0, Duration::MAX]`
    pub fn next_duration(&mut self) -> Duration {
        Duration::try_from_secs_f64(self.next().max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn reset(&mut self) {
        self.delay_index = 0;
    }

    pub fn delay_index(&self) -> usize {
        self.delay_index
    }
}
