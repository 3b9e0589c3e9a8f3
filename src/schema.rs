//! Request configuration payloads accepted by `/upload` and `/query`.
//!
//! Both records are deserialized from the JSON string carried in the `config` form field.
//! Missing required fields or malformed JSON surface as [`SchemaError`], which the HTTP layer
//! reports as `400 Bad config: ...`. Every other field carries an explicit default.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Free-form options forwarded to a provider.
pub type Options = Map<String, Value>;

/// Client-supplied configuration could not be parsed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SchemaError(#[source] pub serde_json::Error);

/// How a source file is decomposed into initial document units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderMode {
    /// One document per file.
    #[default]
    Single,
    /// One document per structural element (title, paragraph, list item).
    Elements,
    /// One document per page.
    Paged,
}

impl LoaderMode {
    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Elements => "elements",
            Self::Paged => "paged",
        }
    }
}

/// Similarity metric configured on the dense-vector field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistanceStrategy {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Dot product over normalized vectors.
    DotProduct,
    /// L2 distance.
    EuclideanDistance,
    /// Unnormalized maximum inner product.
    MaxInnerProduct,
}

impl DistanceStrategy {
    /// Value of the `similarity` property in an Elasticsearch `dense_vector` mapping.
    pub fn es_similarity(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::DotProduct => "dot_product",
            Self::EuclideanDistance => "l2_norm",
            Self::MaxInnerProduct => "max_inner_product",
        }
    }
}

impl fmt::Display for DistanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cosine => "COSINE",
            Self::DotProduct => "DOT_PRODUCT",
            Self::EuclideanDistance => "EUCLIDEAN_DISTANCE",
            Self::MaxInnerProduct => "MAX_INNER_PRODUCT",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "COSINE" => Ok(Self::Cosine),
            "DOT_PRODUCT" => Ok(Self::DotProduct),
            "EUCLIDEAN_DISTANCE" => Ok(Self::EuclideanDistance),
            "MAX_INNER_PRODUCT" => Ok(Self::MaxInnerProduct),
            other => Err(format!(
                "unknown distance '{other}', expected one of COSINE, DOT_PRODUCT, EUCLIDEAN_DISTANCE, MAX_INNER_PRODUCT"
            )),
        }
    }
}

/// Loader section of an upload request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderCfg {
    /// Decomposition policy.
    #[serde(default)]
    pub mode: LoaderMode,
    /// Loader-specific options.
    #[serde(default)]
    pub kwargs: Options,
}

/// Splitter section of an upload request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterCfg {
    /// Symbolic splitter name, resolved by [`crate::splitter::SplitterKind`].
    #[serde(rename = "type", default = "default_splitter_type")]
    pub kind: String,
    /// Maximum chunk length for size-based splitters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap carried between adjacent chunks for size-based splitters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Splitter-specific options.
    #[serde(default)]
    pub kwargs: Options,
}

impl Default for SplitterCfg {
    fn default() -> Self {
        Self {
            kind: default_splitter_type(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            kwargs: Options::new(),
        }
    }
}

/// Embedding provider selection shared by uploads and queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCfg {
    /// Provider tag, resolved by [`crate::embedding::EmbeddingProvider`].
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Provider-specific options.
    #[serde(default)]
    pub kwargs: Options,
}

/// Elasticsearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsAuth {
    /// Candidate node URLs, tried in order.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Basic-auth user.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Encoded API key sent as `Authorization: ApiKey ...`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Elastic Cloud deployment id; overrides `hosts` when present.
    #[serde(default)]
    pub cloud_id: Option<String>,
    /// Transport options (`request_timeout`, `headers`).
    #[serde(default)]
    pub kwargs: Options,
}

impl Default for EsAuth {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            username: None,
            password: None,
            api_key: None,
            cloud_id: None,
            kwargs: Options::new(),
        }
    }
}

/// Configuration for one `/upload` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCfg {
    /// Target index.
    pub index_name: String,
    /// File loader settings.
    #[serde(default)]
    pub loader: LoaderCfg,
    /// Splitter settings.
    #[serde(default)]
    pub splitter: SplitterCfg,
    /// Embedding provider settings.
    pub embedding: EmbeddingCfg,
    /// Search-engine connection.
    pub elasticsearch: EsAuth,
    /// Overwrite chunks with identical ids instead of appending.
    #[serde(default = "default_true")]
    pub upsert: bool,
    /// Metadata merged onto every loaded document.
    #[serde(default)]
    pub metadata: Options,
    /// Name of the dense-vector field.
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    /// Similarity metric for a newly created index; `null` means cosine.
    #[serde(default = "default_distance")]
    pub distance: Option<DistanceStrategy>,
}

/// Configuration for one `/query` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCfg {
    /// Natural-language query.
    pub query: String,
    /// Index to search.
    pub index_name: String,
    /// Search strategy alias or native identifier.
    #[serde(default = "default_search_type")]
    pub search_type: String,
    /// Number of matches to return.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Minimum score a match must reach.
    #[serde(default)]
    pub score_threshold: Option<f64>,
    /// Strategy-specific options.
    #[serde(default)]
    pub retriever_kwargs: Options,
    /// Embedding provider settings; must match the one used at ingestion.
    pub embedding: EmbeddingCfg,
    /// Search-engine connection.
    pub elasticsearch: EsAuth,
    /// Name of the dense-vector field.
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    /// Expected embedding dimensionality.
    #[serde(default)]
    pub dims: Option<usize>,
}

impl UploadCfg {
    /// Parse an upload configuration from its JSON form value.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(raw).map_err(SchemaError)
    }
}

impl QueryCfg {
    /// Parse a query configuration from its JSON form value.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(raw).map_err(SchemaError)
    }
}

fn default_splitter_type() -> String {
    "RecursiveCharacterTextSplitter".to_string()
}

const fn default_chunk_size() -> usize {
    1024
}

const fn default_chunk_overlap() -> usize {
    128
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

const fn default_true() -> bool {
    true
}

fn default_vector_field() -> String {
    "embedding".to_string()
}

fn default_distance() -> Option<DistanceStrategy> {
    Some(DistanceStrategy::Cosine)
}

fn default_search_type() -> String {
    "similarity".to_string()
}

const fn default_k() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_defaults_fill_optional_sections() {
        let raw = json!({
            "index_name": "demo-index",
            "embedding": { "model": "text-embedding-3-small" },
            "elasticsearch": {}
        })
        .to_string();

        let cfg = UploadCfg::from_json(&raw).expect("valid config");
        assert_eq!(cfg.index_name, "demo-index");
        assert_eq!(cfg.loader.mode, LoaderMode::Single);
        assert_eq!(cfg.splitter.kind, "RecursiveCharacterTextSplitter");
        assert_eq!(cfg.splitter.chunk_size, 1024);
        assert_eq!(cfg.splitter.chunk_overlap, 128);
        assert_eq!(cfg.embedding.provider, "openai");
        assert_eq!(cfg.elasticsearch.hosts, vec!["http://localhost:9200"]);
        assert!(cfg.upsert);
        assert!(cfg.metadata.is_empty());
        assert_eq!(cfg.vector_field, "embedding");
        assert_eq!(cfg.distance, Some(DistanceStrategy::Cosine));
    }

    #[test]
    fn upload_accepts_full_payload() {
        let raw = json!({
            "index_name": "demo-index",
            "loader": { "mode": "paged" },
            "splitter": { "type": "TokenTextSplitter", "chunk_size": 256, "chunk_overlap": 16 },
            "embedding": { "provider": "huggingface", "model": "intfloat/multilingual-e5-large-instruct" },
            "elasticsearch": { "hosts": ["http://es:9200"], "username": "elastic", "password": "secret" },
            "upsert": false,
            "metadata": { "project": "demo" },
            "distance": "DOT_PRODUCT"
        })
        .to_string();

        let cfg = UploadCfg::from_json(&raw).expect("valid config");
        assert_eq!(cfg.loader.mode, LoaderMode::Paged);
        assert_eq!(cfg.splitter.kind, "TokenTextSplitter");
        assert_eq!(cfg.splitter.chunk_size, 256);
        assert!(!cfg.upsert);
        assert_eq!(cfg.metadata["project"], "demo");
        assert_eq!(cfg.distance, Some(DistanceStrategy::DotProduct));
        assert_eq!(cfg.elasticsearch.username.as_deref(), Some("elastic"));
    }

    #[test]
    fn upload_rejects_missing_required_fields() {
        let missing_index = json!({
            "embedding": { "model": "m" },
            "elasticsearch": {}
        })
        .to_string();
        let error = UploadCfg::from_json(&missing_index).unwrap_err();
        assert!(error.to_string().contains("index_name"));

        let missing_model = json!({
            "index_name": "i",
            "embedding": {},
            "elasticsearch": {}
        })
        .to_string();
        let error = UploadCfg::from_json(&missing_model).unwrap_err();
        assert!(error.to_string().contains("model"));
    }

    #[test]
    fn upload_rejects_unknown_loader_mode_and_bad_json() {
        let raw = json!({
            "index_name": "i",
            "loader": { "mode": "chapters" },
            "embedding": { "model": "m" },
            "elasticsearch": {}
        })
        .to_string();
        assert!(UploadCfg::from_json(&raw).is_err());
        assert!(UploadCfg::from_json("{not json").is_err());
    }

    #[test]
    fn null_distance_is_preserved() {
        let raw = json!({
            "index_name": "i",
            "embedding": { "model": "m" },
            "elasticsearch": {},
            "distance": null
        })
        .to_string();
        let cfg = UploadCfg::from_json(&raw).expect("valid config");
        assert_eq!(cfg.distance, None);
    }

    #[test]
    fn query_defaults() {
        let raw = json!({
            "query": "what is rust?",
            "index_name": "demo-index",
            "embedding": { "model": "m" },
            "elasticsearch": {}
        })
        .to_string();
        let cfg = QueryCfg::from_json(&raw).expect("valid config");
        assert_eq!(cfg.search_type, "similarity");
        assert_eq!(cfg.k, 4);
        assert_eq!(cfg.score_threshold, None);
        assert_eq!(cfg.vector_field, "embedding");
        assert_eq!(cfg.dims, None);
        assert!(cfg.retriever_kwargs.is_empty());
    }

    #[test]
    fn distance_parses_case_insensitively() {
        assert_eq!(
            "euclidean_distance".parse::<DistanceStrategy>(),
            Ok(DistanceStrategy::EuclideanDistance)
        );
        assert!("HAMMING".parse::<DistanceStrategy>().is_err());
        assert_eq!(DistanceStrategy::MaxInnerProduct.es_similarity(), "max_inner_product");
    }
}
