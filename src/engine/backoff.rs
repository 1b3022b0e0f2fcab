use std::time::Duration;

const MULTIPLIER: f64 = 2.0;

/// Doubling delay between publish attempts, capped at `max`.
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current_attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        if self.initial.is_zero() {
            return Duration::ZERO;
        }

        let factor = MULTIPLIER.powi(i32::try_from(self.current_attempt).unwrap_or(i32::MAX));
        let delay_ms = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);

        self.current_attempt = self.current_attempt.saturating_add(1);
        Duration::from_millis(delay_ms as u64)
    }
}
