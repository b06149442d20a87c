//! Retry policy for runtime calls.
//!
//! Only `Unavailable` is retried; every other status is final. Unary calls
//! get a single retry, the event stream re-subscribes on a short schedule.
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tonic::{Code, Status};

pub const UNARY_BACKOFF: &[Duration] = &[Duration::from_millis(200)];

pub const RESUBSCRIBE_BACKOFF: &[Duration] = &[
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Walks a fixed delay schedule; exhausted once every delay was handed out.
#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: &'static [Duration],
    attempt: usize,
}

impl Backoff {
    pub const fn new(schedule: &'static [Duration]) -> Self {
        Self {
            schedule,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.schedule.get(self.attempt).copied();
        if delay.is_some() {
            self.attempt += 1;
        }
        delay
    }

    pub fn attempts(&self) -> usize {
        self.attempt
    }
}

pub fn is_retryable(status: &Status) -> bool {
    status.code() == Code::Unavailable
}

/// Runs `operation`, retrying on `Unavailable` with the given schedule.
pub async fn retry_unavailable<F, T, Fut>(
    mut operation: F,
    schedule: &'static [Duration],
    method: &str,
) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut backoff = Backoff::new(schedule);

    loop {
        match operation().await {
            Ok(result) => {
                if backoff.attempts() > 0 {
                    tracing::debug!(method, retries = backoff.attempts(), "call succeeded after retry");
                }
                return Ok(result);
            }
            Err(status) if is_retryable(&status) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        method,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "runtime unavailable, retrying: {}",
                        status.message()
                    );
                    sleep(delay).await;
                }
                None => return Err(status),
            },
            Err(status) => return Err(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_immediately() {
        let result = retry_unavailable(|| async { Ok::<_, Status>(42) }, UNARY_BACKOFF, "Version").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_unavailable_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_unavailable(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Status::unavailable("connection refused"))
                    } else {
                        Ok("ok")
                    }
                }
            },
            UNARY_BACKOFF,
            "ListContainers",
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_schedule() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_unavailable(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Status::unavailable("down"))
                }
            },
            UNARY_BACKOFF,
            "Status",
        )
        .await;

        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_codes_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_unavailable(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Status::not_found("missing"))
                }
            },
            UNARY_BACKOFF,
            "ContainerStatus",
        )
        .await;

        assert_eq!(result.unwrap_err().code(), Code::NotFound);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resubscribe_schedule_is_bounded() {
        let mut backoff = Backoff::new(RESUBSCRIBE_BACKOFF);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000)
            ]
        );
        assert_eq!(backoff.attempts(), 3);
        assert_eq!(backoff.next_delay(), None);
    }
}
