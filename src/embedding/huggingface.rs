use super::{
    EmbeddingClient, EmbeddingClientError, EmbeddingProvider, ensure_count, env_token,
    parse_options, send_json,
};
use crate::schema::Options;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

const DEFAULT_INFERENCE_URL: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction";
const TOKEN_ENV: &str = "HF_TOKEN";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HuggingFaceOptions {
    api_key: Option<String>,
    endpoint: Option<String>,
    normalize: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Client for Hugging Face feature-extraction endpoints (Inference API or a TEI deployment).
pub struct HuggingFaceEmbeddingClient {
    http: Client,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    normalize: bool,
    extra: Map<String, Value>,
}

impl HuggingFaceEmbeddingClient {
    /// Configure a client; the token falls back to `HF_TOKEN`.
    pub fn new(
        http: Client,
        model: String,
        options: &Options,
    ) -> Result<Self, EmbeddingClientError> {
        let options: HuggingFaceOptions = parse_options(EmbeddingProvider::HuggingFace, options)?;
        let endpoint = options
            .endpoint
            .unwrap_or_else(|| format!("{DEFAULT_INFERENCE_URL}/{model}"));
        Ok(Self {
            http,
            model,
            endpoint,
            api_key: options.api_key.or_else(|| env_token(TOKEN_ENV)),
            normalize: options.normalize,
            extra: options.extra,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HuggingFaceEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::debug!(
            provider = "huggingface",
            model = %self.model,
            inputs = texts.len(),
            "Generating embeddings"
        );
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let mut payload = self.extra.clone();
        payload.insert(
            "inputs".into(),
            Value::Array(texts.into_iter().map(Value::String).collect()),
        );

        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.api_key {
            request = request.bearer_auth(token);
        }

        let mut vectors: Vec<Vec<f32>> =
            send_json(EmbeddingProvider::HuggingFace, &self.endpoint, request).await?;
        ensure_count(EmbeddingProvider::HuggingFace, expected, &vectors)?;
        if self.normalize {
            vectors.iter_mut().for_each(|vector| l2_normalize(vector));
        }
        Ok(vectors)
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
