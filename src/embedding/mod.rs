//! Embedding provider registry and HTTP clients.
//!
//! [`EmbeddingProvider`] is the closed set of provider tags a request may name. Every tag maps to
//! exactly one client constructor in [`build_embedding_client`]; the match is exhaustive, so a new
//! provider cannot be registered without a factory. Clients talk to the provider over the shared
//! `reqwest::Client` created at startup.

mod huggingface;
mod ollama;
mod openai;

pub use huggingface::HuggingFaceEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::schema::{EmbeddingCfg, Options};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Requested provider tag is not registered.
    #[error("Unknown embedding provider '{name}'. Valid options: {valid}")]
    UnknownProvider {
        /// Tag supplied by the client.
        name: String,
        /// Comma-separated list of registered tags.
        valid: String,
    },
    /// Provider options could not be interpreted.
    #[error("Invalid options for embedding provider {provider}: {reason}")]
    InvalidOptions {
        /// Provider the options were meant for.
        provider: EmbeddingProvider,
        /// Deserialization or validation detail.
        reason: String,
    },
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let mut vectors = self.generate_embeddings(vec![text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingClientError::InvalidResponse(
                "provider returned no vector for the query".into(),
            )
        })
    }
}

/// Registered embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    OpenAI,
    /// Hugging Face feature-extraction endpoint.
    HuggingFace,
    /// Local Ollama runtime.
    Ollama,
}

impl EmbeddingProvider {
    /// Every registered provider, in registry order.
    pub const ALL: [Self; 3] = [Self::OpenAI, Self::HuggingFace, Self::Ollama];

    /// Tag used in request configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::HuggingFace => "huggingface",
            Self::Ollama => "ollama",
        }
    }

    fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|provider| provider.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingProvider {
    type Err = EmbeddingClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EmbeddingClientError::UnknownProvider {
                name: value.to_string(),
                valid: Self::valid_names(),
            })
    }
}

/// Resolved embedding configuration: provider tag, model id and passthrough options.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSpec {
    /// Provider serving the model.
    pub provider: EmbeddingProvider,
    /// Model identifier understood by the provider.
    pub model: String,
    /// Provider options (credentials, endpoint, batch size, extra request fields).
    pub options: Options,
}

impl EmbeddingSpec {
    /// Resolve the provider named in `cfg`.
    pub fn from_cfg(cfg: &EmbeddingCfg) -> Result<Self, EmbeddingClientError> {
        let provider = cfg.provider.parse()?;
        if cfg.model.trim().is_empty() {
            return Err(EmbeddingClientError::InvalidOptions {
                provider,
                reason: "model must not be empty".into(),
            });
        }
        Ok(Self {
            provider,
            model: cfg.model.clone(),
            options: cfg.kwargs.clone(),
        })
    }
}

/// Construct the client for `spec` on top of the shared HTTP pool.
pub fn build_embedding_client(
    spec: &EmbeddingSpec,
    http: Client,
) -> Result<Box<dyn EmbeddingClient>, EmbeddingClientError> {
    let client: Box<dyn EmbeddingClient> = match spec.provider {
        EmbeddingProvider::OpenAI => Box::new(OpenAiEmbeddingClient::new(
            http,
            spec.model.clone(),
            &spec.options,
        )?),
        EmbeddingProvider::HuggingFace => Box::new(HuggingFaceEmbeddingClient::new(
            http,
            spec.model.clone(),
            &spec.options,
        )?),
        EmbeddingProvider::Ollama => Box::new(OllamaEmbeddingClient::new(
            http,
            spec.model.clone(),
            &spec.options,
        )?),
    };
    tracing::debug!(provider = %spec.provider, model = %spec.model, "Embedding client constructed");
    Ok(client)
}

fn parse_options<T: DeserializeOwned>(
    provider: EmbeddingProvider,
    options: &Options,
) -> Result<T, EmbeddingClientError> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|error| {
        EmbeddingClientError::InvalidOptions {
            provider,
            reason: error.to_string(),
        }
    })
}

/// Send a JSON request and decode the JSON reply, mapping transport and status failures.
async fn send_json<T: DeserializeOwned>(
    provider: EmbeddingProvider,
    url: &str,
    request: RequestBuilder,
) -> Result<T, EmbeddingClientError> {
    let response = request.send().await.map_err(|error| {
        EmbeddingClientError::ProviderUnavailable(format!(
            "failed to reach {provider} at {url}: {error}"
        ))
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingClientError::GenerationFailed(format!(
            "{provider} returned {status}: {body}"
        )));
    }

    response.json::<T>().await.map_err(|error| {
        EmbeddingClientError::InvalidResponse(format!(
            "failed to decode {provider} response: {error}"
        ))
    })
}

fn ensure_count(
    provider: EmbeddingProvider,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingClientError> {
    if vectors.len() == expected {
        Ok(())
    } else {
        Err(EmbeddingClientError::InvalidResponse(format!(
            "{provider} returned {} vectors for {expected} inputs",
            vectors.len()
        )))
    }
}

fn env_token(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
