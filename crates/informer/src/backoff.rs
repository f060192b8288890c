//! # Fibonacci Backoff
//!
//! Retry delays that grow along the Fibonacci sequence: more slowly than
//! exponential backoff, so a key that keeps failing is retried a few more
//! times before reaching the cap.
//!
//! With a one second minimum and a ten second cap the sequence is
//! 1s, 1s, 2s, 3s, 5s, 8s, 10s, 10s, ...

use std::time::Duration;

/// Stateful Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// First (and second) delay; restored by `reset`
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff between `min` and `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);

        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }

    /// Delay for the given number of consecutive failures (stateless)
    ///
    /// `error_count` is 0-indexed: counts 0 and 1 both give `min`, then
    /// min*2, min*3, min*5, min*8, ... capped at `max`.
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, min: Duration, max: Duration) -> Duration {
        if error_count <= 1 {
            return min.min(max);
        }

        let mut prev = min;
        let mut current = min;

        for _ in 2..=error_count {
            let next = prev.saturating_add(current);
            prev = current;
            current = next.min(max);

            if current >= max {
                break;
            }
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        let sequence: Vec<Duration> = (0..9).map(|_| backoff.next_backoff()).collect();
        assert_eq!(sequence, secs(&[1, 1, 2, 3, 5, 8, 10, 10, 10]));
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        for _ in 0..4 {
            backoff.next_backoff();
        }
        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_stateless_matches_stateful_sequence() {
        let min = Duration::from_millis(5);
        let max = Duration::from_millis(100);
        let mut backoff = FibonacciBackoff::new(min, max);

        for count in 0..12 {
            assert_eq!(
                FibonacciBackoff::calculate_for_error_count(count, min, max),
                backoff.next_backoff(),
                "error count {count}"
            );
        }
    }
}
