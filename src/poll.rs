//! Bounded polling
//!
//! Every wait in the reconciliation cycle goes through one primitive with an
//! explicit interval and attempt cap. The clock is a trait so tests drive
//! waits without real sleeps.

use crate::error::Result;
use std::time::Duration;

/// Sleep source for polling loops.
pub trait Clock {
    fn sleep(&mut self, duration: Duration);
}

/// Wall-clock sleeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
}

impl PollOutcome {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Evaluate `predicate` up to `max_attempts` times, sleeping `interval`
/// between attempts. The first `Ok(true)` wins; predicate errors propagate
/// immediately. Exhaustion is not an error here so callers choose between
/// fatal and warn-only waits.
pub fn poll_until<C, P>(
    clock: &mut C,
    interval: Duration,
    max_attempts: u32,
    mut predicate: P,
) -> Result<PollOutcome>
where
    C: Clock + ?Sized,
    P: FnMut() -> Result<bool>,
{
    for attempt in 0..max_attempts {
        if attempt > 0 {
            clock.sleep(interval);
        }
        if predicate()? {
            return Ok(PollOutcome::Ready);
        }
        log::debug!("not ready yet (attempt {}/{max_attempts})", attempt + 1);
    }
    Ok(PollOutcome::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Records sleeps instead of performing them.
    #[derive(Default)]
    struct TestClock {
        slept: Vec<Duration>,
    }

    impl Clock for TestClock {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }

    #[test]
    fn ready_on_first_attempt_never_sleeps() {
        let mut clock = TestClock::default();
        let outcome = poll_until(&mut clock, Duration::from_secs(5), 3, || Ok(true)).unwrap();
        assert!(outcome.is_ready());
        assert!(clock.slept.is_empty());
    }

    #[test]
    fn sleeps_between_attempts_until_ready() {
        let mut clock = TestClock::default();
        let mut calls = 0;
        let outcome = poll_until(&mut clock, Duration::from_secs(5), 10, || {
            calls += 1;
            Ok(calls == 3)
        })
        .unwrap();
        assert!(outcome.is_ready());
        assert_eq!(calls, 3);
        assert_eq!(clock.slept, vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn exhaustion_times_out() {
        let mut clock = TestClock::default();
        let outcome = poll_until(&mut clock, Duration::from_secs(1), 4, || Ok(false)).unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(clock.slept.len(), 3);
    }

    #[test]
    fn predicate_errors_propagate() {
        let mut clock = TestClock::default();
        let result = poll_until(&mut clock, Duration::from_secs(1), 4, || {
            Err(Error::Timeout {
                waiting_for: "nothing".into(),
            })
        });
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
