use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::models::retry::RetryConfig;

/// JSON logs filtered by `RUST_LOG`, `info` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(false))
        .try_init();
}

/// Runs `operation` until it succeeds or `config.max_attempts` is used up,
/// sleeping with jittered exponential backoff in between.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    action: &str,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay_ms = config.initial_delay_ms;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(action, attempt, "Succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(action, attempts = attempt, error = %error, "Giving up");
            return Err(error);
        }

        let jitter: f64 = rand::random_range(-0.1..=0.1);
        let backoff = Duration::from_millis((delay_ms as f64 * (1.0 + jitter)) as u64);

        debug!(
            action,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Attempt failed, backing off"
        );

        sleep(backoff).await;

        delay_ms = delay_ms
            .saturating_mul(config.backoff_multiplier)
            .min(config.max_delay_ms);
    }
}
