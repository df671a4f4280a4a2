use crate::common::{
    constants::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT},
    error::{DeadlineExceeded, Result},
};
use std::{future::Future, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::debug;

/// How a readiness wait rechecks its condition and how long it may block.
#[derive(Clone, Copy, Debug)]
pub struct PollParams {
    interval: Duration,
    timeout: Option<Duration>,
    fail_on_error: bool,
}

impl Default for PollParams {
    fn default() -> Self {
        Self {
            interval: humantime::parse_duration(DEFAULT_POLL_INTERVAL)
                .unwrap_or(Duration::from_secs(3)),
            timeout: humantime::parse_duration(DEFAULT_POLL_TIMEOUT).ok(),
            fail_on_error: false,
        }
    }
}

impl PollParams {
    /// A wait which rechecks every `interval`. A `None` timeout waits forever.
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            interval,
            timeout,
            fail_on_error: false,
        }
    }

    /// Any error from the probe ends the wait, including the ones which would otherwise
    /// mean "not ready yet".
    #[must_use]
    pub fn with_fail_on_error(mut self) -> Self {
        self.fail_on_error = true;
        self
    }

    /// The recheck interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The deadline of a single wait.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Evaluate `probe` until it returns true. Transient errors (see
/// crate::common::error::Error::is_transient) count as "not ready yet"; any other error ends
/// the wait. Fails with DeadlineExceeded if the condition isn't met within the timeout.
pub async fn wait_until<F, Fut>(params: &PollParams, what: &str, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for(params, what, move || {
        let ready = probe();
        async move { Ok(ready.await?.then_some(())) }
    })
    .await
}

/// Like wait_until(), for probes which yield a value once ready.
pub async fn wait_for<T, F, Fut>(params: &PollParams, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let waiting = async {
        loop {
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!(%what, "Not ready yet"),
                Err(error) if !params.fail_on_error && error.is_transient() => {
                    debug!(%what, %error, "Not ready yet, lookup failed");
                }
                Err(error) => return Err(error),
            }
            sleep(params.interval).await;
        }
    };

    match params.timeout {
        Some(limit) => timeout(limit, waiting).await.map_err(|_| {
            DeadlineExceeded {
                what,
                timeout: limit,
            }
            .build()
        })?,
        None => waiting.await,
    }
}
