//! Circuit-breaker provider wrapper.
//!
//! Wraps a primary (usually remote) provider and a fallback. Repeated
//! primary failures trip the breaker: calls go straight to the fallback
//! until the cooldown elapses, then the next call probes the primary
//! again. Core pipeline code never sees the branching; it holds one
//! `dyn EnrichmentProvider`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use std::sync::Arc;

use engram_core::error::EngramResult;
use engram_core::traits::{EnrichmentProvider, Features};

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
}

/// Enrichment provider with a failure-tripped fallback path.
pub struct CircuitBreakerProvider {
    primary: Arc<dyn EnrichmentProvider>,
    fallback: Arc<dyn EnrichmentProvider>,
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<(BreakerState, u32)>,
    name: String,
}

impl CircuitBreakerProvider {
    /// Wrap a primary and fallback provider. The breaker opens after
    /// `failure_threshold` consecutive primary failures and stays open
    /// for `cooldown`.
    pub fn new(
        primary: Arc<dyn EnrichmentProvider>,
        fallback: Arc<dyn EnrichmentProvider>,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        let name = format!("circuit({}|{})", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new((BreakerState::Closed, 0)),
            name,
        }
    }

    fn primary_allowed(&self) -> bool {
        let mut guard = self.state.lock().expect("breaker state poisoned");
        match guard.0 {
            BreakerState::Closed => true,
            BreakerState::Open { until } => {
                if Utc::now() >= until {
                    // Half-open: allow one probe.
                    guard.0 = BreakerState::Closed;
                    guard.1 = self.failure_threshold - 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut guard = self.state.lock().expect("breaker state poisoned");
        guard.0 = BreakerState::Closed;
        guard.1 = 0;
    }

    fn record_failure(&self) {
        let mut guard = self.state.lock().expect("breaker state poisoned");
        guard.1 += 1;
        if guard.1 >= self.failure_threshold {
            let until = Utc::now() + self.cooldown;
            guard.0 = BreakerState::Open { until };
            tracing::warn!(
                provider = self.primary.name(),
                failures = guard.1,
                "circuit opened, routing to fallback"
            );
        }
    }

    /// Whether the breaker is currently open.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state.lock().expect("breaker state poisoned").0,
            BreakerState::Open { until } if Utc::now() < until
        )
    }
}

#[async_trait]
impl EnrichmentProvider for CircuitBreakerProvider {
    async fn enrich(&self, content_ref: &str) -> EngramResult<Features> {
        if self.primary_allowed() {
            match self.primary.enrich(content_ref).await {
                Ok(features) => {
                    self.record_success();
                    return Ok(features);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "primary enrichment failed");
                    self.record_failure();
                }
            }
        }
        self.fallback.enrich(content_ref).await
    }

    async fn similarity(&self, a: &str, b: &str) -> EngramResult<f64> {
        if self.primary_allowed() {
            match self.primary.similarity(a, b).await {
                Ok(score) => {
                    self.record_success();
                    return Ok(score);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "primary similarity failed");
                    self.record_failure();
                }
            }
        }
        self.fallback.similarity(a, b).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
