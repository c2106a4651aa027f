//! Engine readiness detection.
//!
//! The engine has no dedicated health endpoint. `/validateResource` only
//! accepts POST, so a GET answered with 405 means the HTTP listener is up and
//! routing requests. Anything else means "not yet".

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::defaults;
use crate::engine::lifecycle::EngineState;

/// How a readiness wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The process went away before a probe succeeded
    Exited,
    TimedOut,
}

/// Single health probe against the engine at `base_url`.
pub async fn probe_health(client: &Client, base_url: &str) -> bool {
    let url = format!("{}/validateResource", base_url);
    match client.get(&url).timeout(defaults::PROBE_TIMEOUT).send().await {
        Ok(response) => response.status() == StatusCode::METHOD_NOT_ALLOWED,
        Err(e) => {
            log::trace!("Health probe failed: {}", e);
            false
        }
    }
}

/// Poll `probe` every `interval` until it succeeds, the engine exits, or
/// `timeout` elapses.
///
/// Runs on the tokio clock, so a paused runtime drives it deterministically.
pub async fn wait_until_ready<F, Fut>(
    mut probe: F,
    mut state: watch::Receiver<EngineState>,
    timeout: Duration,
    interval: Duration,
) -> Readiness
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if *state.borrow() == EngineState::Stopped {
            return Readiness::Exited;
        }

        tokio::select! {
            biased;
            _ = exited(&mut state) => return Readiness::Exited,
            attempt = tokio::time::timeout_at(deadline, probe()) => match attempt {
                Ok(true) => return Readiness::Ready,
                Ok(false) => {}
                Err(_) => return Readiness::TimedOut,
            },
        }

        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => return Readiness::TimedOut,
            _ = exited(&mut state) => return Readiness::Exited,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn exited(state: &mut watch::Receiver<EngineState>) {
    let _ = state.wait_for(|s| *s == EngineState::Stopped).await;
}
