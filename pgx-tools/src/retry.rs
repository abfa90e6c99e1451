//! Retry with decorrelated-jitter backoff, for the transient connection
//! failures that `PgxError::is_transient` flags.

use std::time::{Duration, Instant};

use rand::Rng;

const BASE: Duration = Duration::from_millis(250);
const CAP: Duration = Duration::from_secs(2);

/// `sleep = min(cap, random_between(base, prev_sleep * 3))`, the
/// "decorrelated jitter" formula from the AWS backoff writeup, chosen
/// over plain exponential backoff because it avoids the thundering-herd
/// effect when every worker hits the same transient failure at once.
///
/// Bounded by both a `max_attempts` count and, if supplied, a total
/// wall-clock time budget: either exhausting stops the retry loop.
pub struct Backoff {
    prev: Duration,
    attempt: u32,
    max_attempts: u32,
    deadline: Option<Instant>,
}

impl Backoff {
    pub fn new(max_attempts: u32) -> Self {
        Backoff::with_time_budget(max_attempts, None)
    }

    /// `total_budget = None` disables the time-based cutoff; the loop
    /// then stops purely on `max_attempts`, same as `new`.
    pub fn with_time_budget(max_attempts: u32, total_budget: Option<Duration>) -> Self {
        Backoff {
            prev: BASE,
            attempt: 0,
            max_attempts,
            deadline: total_budget.map(|budget| Instant::now() + budget),
        }
    }

    /// Returns the next delay, or `None` once `max_attempts` or the time
    /// budget is exhausted, so callers can distinguish "sleep more" from
    /// "give up".
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return None;
            }
        }
        self.attempt += 1;

        let upper = self.prev.mul_f64(3.0);
        let next = if upper <= BASE {
            BASE
        } else {
            let lo = BASE.as_millis() as u64;
            let hi = upper.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
        };
        self.prev = next.min(CAP);
        Some(self.prev)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Sleeps for `delay` in ≤100ms increments (the same poll granularity
/// spec §5 uses for non-blocking reaps), calling `interrupted` between
/// increments so a termination signal observed mid-sleep cuts the wait
/// short. Returns `false` if interrupted before the full delay elapsed.
pub fn sleep_interruptible(delay: Duration, interrupted: impl Fn() -> bool) -> bool {
    const POLL: Duration = Duration::from_millis(100);
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        if interrupted() {
            return false;
        }
        let chunk = remaining.min(POLL);
        std::thread::sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
    !interrupted()
}

/// Runs `f`, retrying while it returns an error for which `is_retryable`
/// is true, sleeping per [`Backoff`] between attempts and bailing out
/// early if `interrupted` reports a pending termination signal.
pub fn retry_with_backoff<T, E, F, R, I>(
    max_attempts: u32,
    total_budget: Option<Duration>,
    is_retryable: R,
    interrupted: I,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
    I: Fn() -> bool,
{
    let mut backoff = Backoff::with_time_budget(max_attempts, total_budget);
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(err) if is_retryable(&err) => match backoff.next_delay() {
                Some(delay) => {
                    log::warn!(
                        "transient failure on attempt {}, retrying in {:?}",
                        backoff.attempt(),
                        delay
                    );
                    if !sleep_interruptible(delay, &interrupted) {
                        return Err(err);
                    }
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_cap() {
        let mut b = Backoff::new(20);
        for _ in 0..20 {
            let d = b.next_delay().expect("attempts remain");
            assert!(d >= BASE);
            assert!(d <= CAP);
        }
        assert!(b.next_delay().is_none());
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            3,
            None,
            |_e: &&str| true,
            || false,
            || {
                calls += 1;
                Err("transient")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn stops_retrying_on_non_retryable_error() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            5,
            None,
            |e: &&str| *e == "transient",
            || false,
            || {
                calls += 1;
                Err("fatal")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn stops_retrying_once_interrupted() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            20,
            None,
            |_e: &&str| true,
            || calls >= 2,
            || {
                calls += 1;
                Err("transient")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn time_budget_cuts_off_retries() {
        let mut b = Backoff::with_time_budget(u32::MAX, Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(b.next_delay().is_none());
    }

    #[test]
    fn sleep_interruptible_returns_early() {
        let start = Instant::now();
        let woke = sleep_interruptible(Duration::from_secs(5), || true);
        assert!(!woke);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
