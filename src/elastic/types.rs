//! Shared types used by the Elasticsearch client, writer and retriever.

use crate::embedding::EmbeddingClientError;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors returned while talking to Elasticsearch.
#[derive(Debug, Error)]
pub enum ElasticError {
    /// A host URL failed to parse or normalize.
    #[error("Invalid Elasticsearch URL: {0}")]
    InvalidUrl(String),
    /// `cloud_id` could not be decoded.
    #[error("Invalid Elasticsearch cloud_id: {0}")]
    InvalidCloudId(String),
    /// Connection options could not be interpreted.
    #[error("Invalid Elasticsearch connection options: {0}")]
    InvalidOptions(String),
    /// Neither `hosts` nor `cloud_id` yielded an address.
    #[error("No Elasticsearch hosts configured")]
    NoHosts,
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Elasticsearch responded with an unexpected status code.
    #[error("Unexpected Elasticsearch response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Elasticsearch.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// At least one item of a bulk request was rejected.
    #[error("{failed} document(s) failed to index: {reason}")]
    BulkFailure {
        /// Number of rejected items.
        failed: usize,
        /// First reported failure reason.
        reason: String,
    },
    /// Response body did not have the expected shape.
    #[error("Malformed Elasticsearch response: {0}")]
    MalformedResponse(String),
}

/// Errors raised by the vector store layer (writer and retriever).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport or server failure.
    #[error(transparent)]
    Elastic(#[from] ElasticError),
    /// Embedding provider failure.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Query vector length differs from the declared `dims`.
    #[error("Query embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Declared dimension count.
        expected: usize,
        /// Length of the produced vector.
        actual: usize,
    },
    /// Search type outside the native strategy set.
    #[error("Unknown search type '{name}'. Valid options: {valid}")]
    UnknownStrategy {
        /// Search type after alias resolution.
        name: String,
        /// Comma-separated list of native strategies.
        valid: String,
    },
    /// Retriever options could not be interpreted.
    #[error("Invalid retriever options: {0}")]
    InvalidOptions(String),
}

/// Native retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Approximate kNN.
    Similarity,
    /// Approximate kNN dropping hits under a score threshold.
    SimilarityScoreThreshold,
    /// Maximal marginal relevance over a kNN candidate pool.
    Mmr,
    /// Exact brute-force scoring with a painless script.
    ScriptScore,
    /// BM25 keyword match on the text field.
    SimilarityScore,
}

impl SearchStrategy {
    /// Every native strategy.
    pub const ALL: [Self; 5] = [
        Self::Similarity,
        Self::SimilarityScoreThreshold,
        Self::Mmr,
        Self::ScriptScore,
        Self::SimilarityScore,
    ];

    /// Strategy identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::SimilarityScoreThreshold => "similarity_score_threshold",
            Self::Mmr => "mmr",
            Self::ScriptScore => "script_score",
            Self::SimilarityScore => "similarity_score",
        }
    }

    /// Whether the strategy needs a query embedding.
    pub fn needs_embedding(self) -> bool {
        !matches!(self, Self::SimilarityScore)
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == value)
            .ok_or_else(|| StoreError::UnknownStrategy {
                name: value.to_string(),
                valid: Self::ALL
                    .iter()
                    .map(|strategy| strategy.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Outcome of one bulk write batch sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Chunks accepted by Elasticsearch.
    pub written: usize,
    /// Bulk requests issued.
    pub batches: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    pub(crate) hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HitsEnvelope {
    #[serde(default)]
    pub(crate) hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Hit {
    #[serde(rename = "_score", default)]
    pub(crate) score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub(crate) source: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkResponse {
    #[serde(default)]
    pub(crate) errors: bool,
    #[serde(default)]
    pub(crate) items: Vec<Map<String, Value>>,
}

impl BulkResponse {
    /// Count rejected items and pick the first failure reason.
    pub(crate) fn failures(&self) -> Option<(usize, String)> {
        if !self.errors {
            return None;
        }
        let rejected: Vec<&Value> = self
            .items
            .iter()
            .filter_map(|item| item.values().next())
            .filter_map(|action| action.get("error"))
            .collect();
        let reason = rejected
            .first()
            .map(|error| {
                error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string())
            })
            .unwrap_or_else(|| "bulk request reported errors".to_string());
        Some((rejected.len().max(1), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategies_parse_their_identifiers() {
        for strategy in SearchStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<SearchStrategy>().ok(), Some(strategy));
        }
        let error = "hybrid".parse::<SearchStrategy>().unwrap_err();
        assert!(error.to_string().starts_with("Unknown search type 'hybrid'"));
    }

    #[test]
    fn bulk_failures_report_first_reason() {
        let response: BulkResponse = serde_json::from_value(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "bad vector"}}},
                {"index": {"_id": "c", "status": 400, "error": {"type": "x", "reason": "other"}}}
            ]
        }))
        .expect("bulk response");
        assert_eq!(response.failures(), Some((2, "bad vector".to_string())));

        let clean: BulkResponse =
            serde_json::from_value(json!({"errors": false, "items": []})).expect("bulk response");
        assert_eq!(clean.failures(), None);
    }
}
