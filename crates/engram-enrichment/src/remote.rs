//! Remote HTTP enrichment and embedding providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use engram_core::error::{EngramError, EngramResult};
use engram_core::traits::{Embedder, EnrichmentProvider, Features};

use crate::factory::EnrichmentConfig;

#[derive(Serialize)]
struct EnrichRequest<'a> {
    content_ref: &'a str,
}

#[derive(Serialize)]
struct SimilarityRequest<'a> {
    a: &'a str,
    b: &'a str,
}

#[derive(Deserialize)]
struct SimilarityResponse {
    score: f64,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP enrichment provider for a hosted feature-extraction service.
pub struct RemoteEnrichmentProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RemoteEnrichmentProvider {
    /// Create a provider from config.
    pub fn new(config: &EnrichmentConfig) -> EngramResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            EngramError::Configuration(
                "remote enrichment requires a base_url".to_string(),
            )
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> EngramResult<Resp> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                EngramError::transient(format!("enrichment service unreachable: {}", e))
            } else {
                EngramError::enrichment(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EngramError::transient(format!(
                "enrichment service error: HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(EngramError::enrichment(format!(
                "enrichment request rejected: HTTP {}",
                status
            )));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| EngramError::enrichment(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl EnrichmentProvider for RemoteEnrichmentProvider {
    async fn enrich(&self, content_ref: &str) -> EngramResult<Features> {
        self.post("/v1/enrich", &EnrichRequest { content_ref }).await
    }

    async fn similarity(&self, a: &str, b: &str) -> EngramResult<f64> {
        let response: SimilarityResponse =
            self.post("/v1/similarity", &SimilarityRequest { a, b }).await?;
        Ok(response.score.clamp(0.0, 1.0))
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// HTTP embedding provider. Optional collaborator: the pipeline degrades
/// to category clustering when it is absent or failing.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl RemoteEmbedder {
    /// Create an embedder from config.
    pub fn new(config: &EnrichmentConfig, dimensions: usize) -> EngramResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            EngramError::Configuration("remote embedder requires a base_url".to_string())
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, content_ref: &str) -> EngramResult<Vec<f32>> {
        let mut request = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&EmbedRequest { input: content_ref });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                EngramError::transient(format!("embedding service unreachable: {}", e))
            } else {
                EngramError::embedding(e.to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(EngramError::embedding(format!(
                "embedding request failed: HTTP {}",
                response.status()
            )));
        }
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EngramError::embedding(format!("invalid response body: {}", e)))?;
        if body.embedding.len() != self.dimensions {
            return Err(EngramError::embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                body.embedding.len()
            )));
        }
        Ok(body.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
