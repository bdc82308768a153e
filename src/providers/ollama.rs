//! Local embeddings via an Ollama server. No API key required.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::providers::{Embedder, TaskHint};

const DEFAULT_HOST: &str = "http://localhost:11434";
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedding provider backed by a local Ollama instance. The model must
/// already be pulled (e.g. `nomic-embed-text`, `all-minilm`) and `dimension`
/// must match its output width.
pub struct OllamaEmbedder {
    host: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f64>>,
}

impl OllamaEmbedder {
    pub fn new(model: &str, dimension: usize) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: model.to_string(),
            dimension,
            client: reqwest::Client::builder()
                .timeout(EMBED_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point at a non-default Ollama server.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    /// The task hint is accepted for interface compatibility but ignored —
    /// Ollama embeddings have no task-specific modes.
    async fn embed(&self, text: &str, _task: TaskHint) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.host);
        let body = OllamaEmbedRequest {
            model: &self.model,
            input: text,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("ollama embed request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("ollama embed {status}: {}", &body[..body.len().min(200)]);
        }

        let parsed: OllamaEmbedResponse = resp.json().await.context("ollama embed decode")?;
        let Some(first) = parsed.embeddings.first() else {
            bail!("empty embedding returned");
        };
        if first.is_empty() {
            bail!("empty embedding returned");
        }
        if first.len() != self.dimension {
            bail!(
                "embedding dimension mismatch: got {}, want {} (wrong model?)",
                first.len(),
                self.dimension
            );
        }

        Ok(first.iter().map(|v| *v as f32).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
