//! Readiness probing - polling an app URL until it answers 200

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

/// Per-request timeout for a single probe
pub const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default delay between probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll `url` until it returns HTTP 200 or `timeout` elapses.
///
/// Only a 200 ends polling early. Other statuses and transport errors are
/// retried; the last transport error is reported in the timeout error.
pub async fn wait_until_ready(
    url: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_REQUEST_TIMEOUT)
        .build()?;

    let start = Instant::now();
    let mut attempts = 0usize;
    let mut last_error: Option<String> = None;

    debug!("Waiting for {} (timeout: {:?})", url, timeout);

    while start.elapsed() < timeout {
        attempts += 1;
        let remaining = timeout.saturating_sub(start.elapsed());
        let request_timeout = remaining.min(PROBE_REQUEST_TIMEOUT);

        match client.get(url).timeout(request_timeout).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                info!("Got 200 OK from {} after {} attempt(s)", url, attempts);
                return Ok(());
            }
            Ok(resp) => {
                debug!("Readiness probe returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    debug!("Waiting for app to start...");
                }
                last_error = Some(e.to_string());
            }
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }
        sleep(poll_interval.min(remaining)).await;
    }

    Err(HarnessError::ReadinessTimeout {
        url: url.to_string(),
        last_error,
    })
}
