use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
            cancellation: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RetryAbort<E> {
    /// The cancellation token fired during an attempt or a backoff sleep.
    Cancelled { attempts: usize },
    /// The last error was terminal or the attempt budget ran out.
    Failed { error: E, attempts: usize },
}

/// Runs `operation` until it succeeds, the error is classified as terminal,
/// the attempt budget is spent, or the cancellation token fires. Cancellation
/// interrupts an in-flight attempt as well as the sleep between attempts.
pub(crate) async fn retry_with_backoff<'a, T, E, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T, RetryAbort<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E, bool),
    C: FnMut(usize, &E) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        if config.cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(RetryAbort::Cancelled { attempts: attempt });
        }

        attempt += 1;
        let outcome = match config.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RetryAbort::Cancelled { attempts: attempt }),
                outcome = operation(attempt) => outcome,
            },
            None => operation(attempt).await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => {
                    return Err(RetryAbort::Failed {
                        error: err,
                        attempts: attempt,
                    })
                }
                RetryDisposition::Retry => {
                    let exhausted = config
                        .max_attempts
                        .map(|max| attempt >= max)
                        .unwrap_or(false);

                    on_retry(attempt, backoff, &err, !exhausted);

                    if exhausted {
                        return Err(RetryAbort::Failed {
                            error: err,
                            attempts: attempt,
                        });
                    }

                    if !sleep_with_cancellation(backoff, config.cancellation).await {
                        return Err(RetryAbort::Cancelled { attempts: attempt });
                    }
                    backoff = next_backoff(backoff, config.max_delay);
                }
            },
        }
    }
}

/// Returns false when the sleep was cut short by cancellation.
async fn sleep_with_cancellation(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return true;
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    } else {
        sleep(delay).await;
        true
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
