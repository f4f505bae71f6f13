//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use sluice::{OrchestratorSettings, Payload};

/// Short backoffs and bounds so tests finish quickly
pub fn fast_settings(max_in_flight: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        max_in_flight,
        idle_backoff: Duration::from_millis(1),
        error_backoff: Duration::from_millis(1),
        join_timeout: Duration::from_secs(1),
        drain_timeout: Duration::from_secs(2),
        disconnect_timeout: Duration::from_secs(1),
    }
}

/// String payloads from `(id, data)` pairs
pub fn payloads(pairs: &[(&str, &str)]) -> Vec<Payload<String>> {
    pairs
        .iter()
        .map(|(id, data)| Payload::with_id(*id, data.to_string()))
        .collect()
}

/// Poll `condition` until it holds or `limit` passes
pub async fn wait_until<F>(limit: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
