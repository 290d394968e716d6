//! Provider factory.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use engram_core::error::EngramResult;
use engram_core::traits::EnrichmentProvider;

use crate::circuit::CircuitBreakerProvider;
use crate::fallback::RuleBasedProvider;
use crate::remote::RemoteEnrichmentProvider;

/// Which provider stack to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentProviderKind {
    /// Remote only; failures surface to the caller's retry/fallback path.
    Remote,
    /// Local rule-based heuristics only.
    RuleBased,
    /// Remote behind a circuit breaker with the rule-based fallback.
    #[default]
    Auto,
}

/// Enrichment collaborator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Provider stack selection.
    pub provider: EnrichmentProviderKind,
    /// Base URL of the remote enrichment service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Bearer token for the remote service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Consecutive failures before the breaker opens.
const BREAKER_THRESHOLD: u32 = 5;
/// How long the breaker stays open.
const BREAKER_COOLDOWN_SECS: i64 = 120;

/// Build the configured enrichment provider.
pub fn create_enrichment_provider(
    config: &EnrichmentConfig,
) -> EngramResult<Arc<dyn EnrichmentProvider>> {
    match config.provider {
        EnrichmentProviderKind::Remote => {
            Ok(Arc::new(RemoteEnrichmentProvider::new(config)?))
        }
        EnrichmentProviderKind::RuleBased => Ok(Arc::new(RuleBasedProvider::new())),
        EnrichmentProviderKind::Auto => {
            let fallback: Arc<dyn EnrichmentProvider> = Arc::new(RuleBasedProvider::new());
            match RemoteEnrichmentProvider::new(config) {
                Ok(remote) => Ok(Arc::new(CircuitBreakerProvider::new(
                    Arc::new(remote),
                    fallback,
                    BREAKER_THRESHOLD,
                    Duration::seconds(BREAKER_COOLDOWN_SECS),
                ))),
                // No remote endpoint configured: rule-based alone.
                Err(_) => Ok(fallback),
            }
        }
    }
}
