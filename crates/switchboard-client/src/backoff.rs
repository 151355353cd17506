//! Reconnect delay schedule.

use std::time::Duration;

/// Default delay before the first reconnect.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound on the reconnect delay (5 minutes).
pub const MAX_DELAY: Duration = Duration::from_millis(300_000);

/// Exponential backoff: each call to [`Backoff::next_delay`] returns the
/// current delay and doubles it, up to [`MAX_DELAY`].
///
/// The delay is not reset after a successful reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
    cap: Duration,
    cancelled: bool,
}

impl Backoff {
    /// Start at `initial`.
    #[must_use]
    pub fn new(initial: Duration) -> Self {
        Self {
            delay: initial.min(MAX_DELAY),
            cap: MAX_DELAY,
            cancelled: false,
        }
    }

    /// The schedule for a listener.
    ///
    /// With `reconnect_on_fail` unset the delay is zero and stays zero:
    /// reconnects are immediate until cancelled.
    #[must_use]
    pub fn for_listener(reconnect_on_fail: bool, initial: Duration) -> Self {
        if reconnect_on_fail {
            Self::new(initial)
        } else {
            Self::new(Duration::ZERO)
        }
    }

    /// Use a different cap.
    #[must_use]
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self.delay = self.delay.min(cap);
        self
    }

    /// The delay to wait before the next attempt, or `None` once cancelled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.cancelled {
            return None;
        }
        let delay = self.delay;
        self.delay = delay.saturating_mul(2).min(self.cap);
        Some(delay)
    }

    /// Stop scheduling reconnects. Irreversible.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u128> = (0..12)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();

        assert_eq!(
            delays,
            vec![
                1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000, 300000, 300000,
                300000
            ]
        );
    }

    #[test]
    fn test_no_reconnect_on_fail_is_immediate() {
        let mut backoff = Backoff::for_listener(false, DEFAULT_INITIAL_DELAY);
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Some(Duration::ZERO));
        }
    }

    #[test]
    fn test_cancel() {
        let mut backoff = Backoff::default();
        assert!(backoff.next_delay().is_some());

        backoff.cancel();
        assert!(backoff.is_cancelled());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_custom_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500)).with_cap(Duration::from_secs(2));
        let delays: Vec<u128> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 2000, 2000]);
    }
}
