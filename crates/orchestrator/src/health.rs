use std::time::Duration;

use futures_util::future::join_all;
use registry::health_url;

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub timeout: Duration,
    /// Port units serve `/health` on (same as the invocation port).
    pub port: u16,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
            port: 8000,
        }
    }
}

/// Poll every endpoint concurrently until all are healthy. Returns the first
/// endpoint (in list order) that exhausted its attempts.
pub async fn wait_until_healthy(
    client: &reqwest::Client,
    endpoints: &[String],
    policy: &HealthPolicy,
) -> Result<(), String> {
    let checks = endpoints
        .iter()
        .map(|endpoint| poll_endpoint(client, endpoint, policy));
    let results = join_all(checks).await;

    for (endpoint, healthy) in endpoints.iter().zip(results) {
        if !healthy {
            return Err(endpoint.clone());
        }
    }
    Ok(())
}

async fn poll_endpoint(client: &reqwest::Client, endpoint: &str, policy: &HealthPolicy) -> bool {
    let url = health_url(endpoint, policy.port);
    for attempt in 1..=policy.attempts {
        match client.get(&url).timeout(policy.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(endpoint, attempt, "unit healthy");
                return true;
            }
            Ok(response) => {
                tracing::debug!(endpoint, attempt, "unit not ready: status {}", response.status());
            }
            Err(err) => tracing::debug!(endpoint, attempt, "unit not reachable: {}", err),
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    tracing::warn!(endpoint, attempts = policy.attempts, "unit never became healthy");
    false
}
