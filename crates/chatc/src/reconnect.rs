use std::time::Duration;

/// Fixed-interval reconnect schedule.
///
/// Every attempt waits the same delay: no growth, no jitter, no limit.
#[derive(Debug)]
pub struct ReconnectSchedule {
    delay: Duration,
    attempts: u64,
}

impl ReconnectSchedule {
    /// Creates a schedule that always waits `delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatc::reconnect::ReconnectSchedule;
    /// use std::time::Duration;
    /// let mut schedule = ReconnectSchedule::new(Duration::from_millis(5000));
    /// assert_eq!(schedule.next_delay(), Duration::from_millis(5000));
    /// assert_eq!(schedule.next_delay(), Duration::from_millis(5000));
    /// assert_eq!(schedule.attempts(), 2);
    /// ```
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay, attempts: 0 }
    }

    /// The delay before the next attempt. Counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.delay
    }

    /// Consecutive failed attempts since the last successful session.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Clears the attempt counter after a session reached the server.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_grows() {
        let mut schedule = ReconnectSchedule::new(Duration::from_millis(250));
        for _ in 0..50 {
            assert_eq!(schedule.next_delay(), Duration::from_millis(250));
        }
        assert_eq!(schedule.attempts(), 50);
    }

    #[test]
    fn reset_clears_attempts_but_keeps_delay() {
        let mut schedule = ReconnectSchedule::new(Duration::from_secs(5));
        schedule.next_delay();
        schedule.next_delay();
        schedule.reset();
        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_delay(), Duration::from_secs(5));
    }
}
