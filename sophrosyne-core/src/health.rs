//! Liveness/readiness aggregation, ported and trimmed from the teacher's
//! `r2e-core::health` module. The axum-handler wiring lives in
//! `sophrosyne-transport`; this module only computes the aggregate status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckStatus {
    pub name: String,
    pub status: HealthStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckStatus>,
}

/// A single named health signal, e.g. "store" or "upstream-checks".
#[async_trait::async_trait]
pub trait HealthIndicator: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> Result<(), String>;
    /// Whether a `Down` result from this indicator should fail readiness.
    /// Indicators that only affect liveness (e.g. a panic counter threshold)
    /// return `false`.
    fn affects_readiness(&self) -> bool {
        true
    }
}

struct CachedResult {
    response: HealthResponse,
    computed_at: Instant,
}

/// Aggregates a set of indicators, with an optional short-lived cache so a
/// health-check storm doesn't re-run every indicator on every request.
pub struct HealthState {
    indicators: Vec<Arc<dyn HealthIndicator>>,
    cache_ttl: Option<Duration>,
    cached: RwLock<Option<CachedResult>>,
}

impl HealthState {
    pub fn new(indicators: Vec<Arc<dyn HealthIndicator>>, cache_ttl: Option<Duration>) -> Self {
        Self {
            indicators,
            cache_ttl,
            cached: RwLock::new(None),
        }
    }

    pub async fn liveness(&self) -> HealthStatus {
        // Liveness never depends on indicator I/O; the process being able to
        // answer at all is the liveness signal.
        HealthStatus::Up
    }

    pub async fn readiness(&self) -> HealthResponse {
        if let Some(ttl) = self.cache_ttl {
            if let Some(cached) = self.cached.read().await.as_ref() {
                if cached.computed_at.elapsed() < ttl {
                    return cached.response.clone();
                }
            }
        }

        let mut checks = Vec::with_capacity(self.indicators.len());
        let mut overall = HealthStatus::Up;
        for indicator in &self.indicators {
            let (status, detail) = match indicator.check().await {
                Ok(()) => (HealthStatus::Up, None),
                Err(detail) => (HealthStatus::Down, Some(detail)),
            };
            if status == HealthStatus::Down && indicator.affects_readiness() {
                overall = HealthStatus::Down;
            }
            checks.push(HealthCheckStatus {
                name: indicator.name().to_string(),
                status,
                detail,
            });
        }

        let response = HealthResponse {
            status: overall,
            checks,
        };

        if self.cache_ttl.is_some() {
            *self.cached.write().await = Some(CachedResult {
                response: response.clone(),
                computed_at: Instant::now(),
            });
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysUp;
    #[async_trait::async_trait]
    impl HealthIndicator for AlwaysUp {
        fn name(&self) -> &str {
            "always-up"
        }
        async fn check(&self) -> Result<(), String> {
            Ok(())
        }
    }

    struct AlwaysDown;
    #[async_trait::async_trait]
    impl HealthIndicator for AlwaysDown {
        fn name(&self) -> &str {
            "always-down"
        }
        async fn check(&self) -> Result<(), String> {
            Err("simulated failure".into())
        }
    }

    struct DownButIgnored;
    #[async_trait::async_trait]
    impl HealthIndicator for DownButIgnored {
        fn name(&self) -> &str {
            "panics"
        }
        async fn check(&self) -> Result<(), String> {
            Err("threshold exceeded".into())
        }
        fn affects_readiness(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn all_up_yields_overall_up() {
        let state = HealthState::new(vec![Arc::new(AlwaysUp)], None);
        assert_eq!(state.readiness().await.status, HealthStatus::Up);
    }

    #[tokio::test]
    async fn one_down_fails_readiness() {
        let state = HealthState::new(vec![Arc::new(AlwaysUp), Arc::new(AlwaysDown)], None);
        let resp = state.readiness().await;
        assert_eq!(resp.status, HealthStatus::Down);
        assert_eq!(resp.checks.len(), 2);
    }

    #[tokio::test]
    async fn indicator_not_affecting_readiness_is_reported_but_ignored() {
        let state = HealthState::new(vec![Arc::new(AlwaysUp), Arc::new(DownButIgnored)], None);
        let resp = state.readiness().await;
        assert_eq!(resp.status, HealthStatus::Up);
        assert!(resp.checks.iter().any(|c| c.name == "panics" && c.status == HealthStatus::Down));
    }

    #[tokio::test]
    async fn liveness_is_always_up() {
        let state = HealthState::new(vec![Arc::new(AlwaysDown)], None);
        assert_eq!(state.liveness().await, HealthStatus::Up);
    }
}
