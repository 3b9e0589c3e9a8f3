use super::{
    EmbeddingClient, EmbeddingClientError, EmbeddingProvider, ensure_count, parse_options,
    send_json,
};
use crate::schema::Options;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OllamaOptions {
    base_url: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for a local Ollama runtime (`/api/embed`).
pub struct OllamaEmbeddingClient {
    http: Client,
    model: String,
    base_url: String,
    extra: Map<String, Value>,
}

impl OllamaEmbeddingClient {
    /// Configure a client against `base_url` (default `http://127.0.0.1:11434`).
    pub fn new(
        http: Client,
        model: String,
        options: &Options,
    ) -> Result<Self, EmbeddingClientError> {
        let options: OllamaOptions = parse_options(EmbeddingProvider::Ollama, options)?;
        Ok(Self {
            http,
            model,
            base_url: options
                .base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            extra: options.extra,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::debug!(
            provider = "ollama",
            model = %self.model,
            inputs = texts.len(),
            "Generating embeddings"
        );
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let mut payload = self.extra.clone();
        payload.insert("model".into(), Value::String(self.model.clone()));
        payload.insert(
            "input".into(),
            Value::Array(texts.into_iter().map(Value::String).collect()),
        );

        let url = self.endpoint();
        let request = self.http.post(&url).json(&payload);
        let body: OllamaEmbedResponse = send_json(EmbeddingProvider::Ollama, &url, request).await?;
        ensure_count(EmbeddingProvider::Ollama, expected, &body.embeddings)?;
        Ok(body.embeddings)
    }
}
