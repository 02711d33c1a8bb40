//! Bounded "poll until ready or deadline" loops.
//!
//! Every backend wait (container address, domain state, volume status, ...)
//! goes through [`poll_until`] so the timeout policy lives in one place. The
//! clock is injectable: production code uses [`TokioClock`], tests use
//! [`ManualClock`] which advances instantly on `sleep`.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Source of time for polling loops.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock whose `sleep` returns immediately after moving time forward.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Total simulated time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Retry interval and overall deadline of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub const fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

/// The deadline of a [`poll_until`] loop passed without the probe succeeding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what} not reached within {}s", .timeout.as_secs())]
pub struct PollTimeout {
    pub what: String,
    pub timeout: Duration,
}

/// Run `probe` every `policy.interval` until it yields `Some`, it fails, or
/// `policy.timeout` elapses.
///
/// The probe always runs at least once. Probe errors abort the loop
/// immediately; only "not ready yet" (`Ok(None)`) is retried.
pub async fn poll_until<C, T, E, F, Fut>(
    clock: &C,
    policy: PollPolicy,
    what: &str,
    mut probe: F,
) -> Result<T, E>
where
    C: Clock + ?Sized,
    E: From<PollTimeout>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = clock.now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = probe().await? {
            debug!(what, attempts, "poll condition reached");
            return Ok(value);
        }

        if clock.now().duration_since(start) >= policy.timeout {
            return Err(PollTimeout {
                what: what.to_string(),
                timeout: policy.timeout,
            }
            .into());
        }

        debug!(what, attempts, "not ready, retrying in {:?}", policy.interval);
        clock.sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Timeout(PollTimeout),
        Probe(&'static str),
    }

    impl From<PollTimeout> for TestError {
        fn from(err: PollTimeout) -> Self {
            TestError::Timeout(err)
        }
    }

    #[tokio::test]
    async fn test_returns_first_ready_value() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value: Result<u32, TestError> =
            poll_until(&clock, PollPolicy::from_secs(1, 10), "value", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(if n == 3 { Some(n) } else { None })
            })
            .await;

        assert_eq!(value, Ok(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_times_out_when_never_ready() {
        let clock = ManualClock::new();

        let result: Result<(), TestError> =
            poll_until(&clock, PollPolicy::from_secs(5, 300), "server ACTIVE", || async {
                Ok(None)
            })
            .await;

        match result {
            Err(TestError::Timeout(timeout)) => {
                assert_eq!(timeout.what, "server ACTIVE");
                assert_eq!(timeout.timeout, Duration::from_secs(300));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(clock.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_probe_error_aborts_without_sleeping() {
        let clock = ManualClock::new();

        let result: Result<(), TestError> =
            poll_until(&clock, PollPolicy::from_secs(1, 60), "ip", || async {
                Err(TestError::Probe("container gone"))
            })
            .await;

        assert_eq!(result, Err(TestError::Probe("container gone")));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_timeout_message() {
        let err = PollTimeout {
            what: "volume available".to_string(),
            timeout: Duration::from_secs(1200),
        };
        assert_eq!(err.to_string(), "volume available not reached within 1200s");
    }
}
