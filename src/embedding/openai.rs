use super::{
    EmbeddingClient, EmbeddingClientError, EmbeddingProvider, ensure_count, env_token,
    parse_options, send_json,
};
use crate::schema::Options;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OpenAiOptions {
    api_key: Option<String>,
    base_url: Option<String>,
    batch_size: usize,
    /// Remaining keys (`dimensions`, `user`, ...) are forwarded in the request body.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for OpenAiOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            batch_size: 512,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Client for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
    batch_size: usize,
    extra: Map<String, Value>,
}

impl OpenAiEmbeddingClient {
    /// Configure a client; the key falls back to `OPENAI_API_KEY`.
    pub fn new(
        http: Client,
        model: String,
        options: &Options,
    ) -> Result<Self, EmbeddingClientError> {
        let options: OpenAiOptions = parse_options(EmbeddingProvider::OpenAI, options)?;
        if options.batch_size == 0 {
            return Err(EmbeddingClientError::InvalidOptions {
                provider: EmbeddingProvider::OpenAI,
                reason: "batch_size must be greater than zero".into(),
            });
        }
        Ok(Self {
            http,
            model,
            base_url: options
                .base_url
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key: options.api_key.or_else(|| env_token(API_KEY_ENV)),
            batch_size: options.batch_size,
            extra: options.extra,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut payload = self.extra.clone();
        payload.insert("model".into(), Value::String(self.model.clone()));
        payload.insert(
            "input".into(),
            Value::Array(batch.iter().cloned().map(Value::String).collect()),
        );

        let url = self.endpoint();
        let mut request = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body: EmbeddingsResponse =
            send_json(EmbeddingProvider::OpenAI, &url, request).await?;
        let mut items = body.data;
        items.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();
        ensure_count(EmbeddingProvider::OpenAI, batch.len(), &vectors)?;
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::debug!(
            provider = "openai",
            model = %self.model,
            inputs = texts.len(),
            "Generating embeddings"
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(embeddings)
    }
}
