//! Bounded retry with exponential backoff.
//!
//! Every network stage retries through this one combinator so the backoff
//! schedule lives in a single place: delays start at the configured value
//! and double on each retry, with at most `max_tries` retries after the
//! initial attempt.

use log::info;
use std::thread;
use std::time::Duration;

/// The geometric delay schedule. Yields one delay per permitted retry.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    delay: Duration,
    remaining: u32,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max_tries: u32) -> Self {
        Self {
            delay: initial,
            remaining: max_tries,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.delay;
        self.delay *= 2;
        Some(delay)
    }
}

/// Runs `op` until it succeeds or the schedule is exhausted, sleeping
/// between attempts. Returns the last error on exhaustion.
pub(crate) fn with_retries<T, E, F>(
    what: &str,
    max_tries: u32,
    initial: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let mut backoff = Backoff::new(initial, max_tries);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next() {
                Some(delay) => {
                    attempt += 1;
                    thread::sleep(delay);
                    info!("Retry #{} {}", attempt, what);
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_form_a_geometric_sequence() {
        let delays: Vec<u64> = Backoff::new(Duration::from_secs(10), 3)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![10, 20, 40]);
    }

    #[test]
    fn schedule_is_bounded_by_max_tries() {
        assert_eq!(Backoff::new(Duration::from_secs(10), 0).count(), 0);
        assert_eq!(Backoff::new(Duration::from_secs(1), 5).count(), 5);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result: Result<u32, &str> = with_retries("op", 3, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                Err("flaky")
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_tries_retries() {
        let mut calls = 0;
        let result: Result<(), &str> = with_retries("op", 3, Duration::ZERO, || {
            calls += 1;
            Err("down")
        });
        assert_eq!(result, Err("down"));
        // One initial attempt plus max_tries retries.
        assert_eq!(calls, 4);
    }

    #[test]
    fn zero_tries_means_a_single_attempt() {
        let mut calls = 0;
        let result: Result<(), &str> = with_retries("op", 0, Duration::ZERO, || {
            calls += 1;
            Err("no retries for local content")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
