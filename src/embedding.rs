//! Embedding client abstraction and implementations.
//!
//! Defines the [`EmbeddingClient`] trait and three concrete backends
//! selected at configuration time:
//!
//! - **Hosted** — the hosted embeddings API, authenticated with an API key.
//! - **Local** — a local runtime speaking the same wire format over plain
//!   HTTP, no credentials.
//! - **Compatible** — any remote endpoint that mimics the hosted wire
//!   format (key + base URL).
//!
//! # Error taxonomy
//!
//! | Condition | Error | Retried by the index engine |
//! |-----------|-------|------------------------------|
//! | HTTP 401/403 | [`Error::Unauthorized`] | no |
//! | HTTP 429 | [`Error::RateLimited`] | yes |
//! | HTTP 5xx, network failure | [`Error::Transport`] | yes |
//! | other 4xx | [`Error::Config`] | no |
//!
//! The client carries no retry policy of its own; backoff lives in the
//! index engine's embedding loop.
//!
//! # Dimension discovery
//!
//! The vector length is taken from configuration, but the first successful
//! call is authoritative: if the provider returns a different length, the
//! client updates its advertised dimension and logs a warning. Callers must
//! compare [`EmbeddingClient::dimension`] against the store's schema before
//! writing rows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::{Config, ProviderConfig};
use crate::error::{Error, Result};

const HOSTED_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Text-to-vector capability.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded on every persisted row.
    fn model(&self) -> &str;

    /// Currently advertised vector length.
    fn dimension(&self) -> usize;

    /// Embed one text. Returns a vector of [`EmbeddingClient::dimension`]
    /// floats on success.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the configured client.
pub fn create_client(config: &Config) -> Box<dyn EmbeddingClient> {
    let (base_url, api_key) = match &config.provider {
        ProviderConfig::Hosted { api_key } => (HOSTED_BASE_URL.to_string(), Some(api_key.clone())),
        ProviderConfig::Local { base_url } => (base_url.clone(), None),
        ProviderConfig::Compatible { api_key, base_url } => {
            (base_url.clone(), Some(api_key.clone()))
        }
    };
    Box::new(HttpEmbeddingClient::new(
        base_url,
        api_key,
        config.embedding_model.clone(),
        config.embedding_dimension,
    ))
}

/// All three providers speak one wire format; they differ only in endpoint
/// and credentials.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: AtomicUsize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String, dimension: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        HttpEmbeddingClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimension: AtomicUsize::new(dimension),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => Error::Unauthorized(format!("{status}: {detail}")),
                429 => Error::RateLimited(detail),
                s if status.is_server_error() => Error::Transport(format!("{s}: {detail}")),
                _ => Error::Config(format!("embedding request rejected ({status}): {detail}")),
            });
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("malformed embedding response: {e}")))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Transport("empty embedding response".into()))?;

        let advertised = self.dimension.load(Ordering::Relaxed);
        if vector.len() != advertised {
            warn!(
                model = %self.model,
                configured = advertised,
                observed = vector.len(),
                "provider reports a different embedding dimension; updating"
            );
            self.dimension.store(vector.len(), Ordering::Relaxed);
        }

        Ok(vector)
    }
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`. Returns `0.0`
/// for empty or mismatched inputs. Used by the legacy JSON-column search
/// path, which ranks in memory.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        let c = HttpEmbeddingClient::new(
            "http://localhost:8080/v1/".into(),
            None,
            "test-model".into(),
            8,
        );
        assert_eq!(c.endpoint(), "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn advertised_dimension_starts_at_config() {
        let c = HttpEmbeddingClient::new("http://x".into(), None, "m".into(), 1536);
        assert_eq!(c.dimension(), 1536);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }
}
