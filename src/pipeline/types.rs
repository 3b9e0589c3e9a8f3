//! Outcomes and errors of the ingestion and query pipelines.

use crate::document::{Document, Metadata, SCORE_KEY};
use crate::elastic::{ElasticError, StoreError};
use crate::embedding::EmbeddingClientError;
use crate::loader::LoaderError;
use crate::splitter::SplitterError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors emitted by the ingestion and query pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request configuration is inconsistent.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Splitter could not be resolved or constructed.
    #[error(transparent)]
    Splitter(#[from] SplitterError),
    /// Embedding provider could not be resolved or failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A staged file could not be turned into documents.
    #[error("Failed to load '{file}': {source}")]
    Loader {
        /// Upload file name.
        file: String,
        /// Underlying loader failure.
        #[source]
        source: LoaderError,
    },
    /// Loader options were rejected while planning.
    #[error(transparent)]
    LoaderConfig(LoaderError),
    /// Blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ElasticError> for PipelineError {
    fn from(error: ElasticError) -> Self {
        Self::Store(StoreError::Elastic(error))
    }
}

/// Coarse failure category used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The request configuration is at fault.
    Config,
    /// An uploaded file could not be extracted.
    Extraction,
    /// The embedding provider or Elasticsearch failed.
    Upstream,
    /// Local failure (scratch I/O, task panic).
    Internal,
}

impl PipelineError {
    /// Classify the failure.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::InvalidConfig(_) | Self::Splitter(_) | Self::LoaderConfig(_) => {
                FailureClass::Config
            }
            Self::Embedding(error) => embedding_class(error),
            Self::Store(error) => store_class(error),
            Self::Loader { source, .. } => match source {
                LoaderError::Io(_) => FailureClass::Internal,
                LoaderError::Pdf(_) => FailureClass::Extraction,
                LoaderError::InvalidOptions(_) => FailureClass::Config,
            },
            Self::Join(_) => FailureClass::Internal,
        }
    }
}

fn embedding_class(error: &EmbeddingClientError) -> FailureClass {
    match error {
        EmbeddingClientError::UnknownProvider { .. }
        | EmbeddingClientError::InvalidOptions { .. } => FailureClass::Config,
        EmbeddingClientError::GenerationFailed(_)
        | EmbeddingClientError::ProviderUnavailable(_)
        | EmbeddingClientError::InvalidResponse(_) => FailureClass::Upstream,
    }
}

fn store_class(error: &StoreError) -> FailureClass {
    match error {
        StoreError::Elastic(
            ElasticError::InvalidUrl(_)
            | ElasticError::InvalidCloudId(_)
            | ElasticError::InvalidOptions(_)
            | ElasticError::NoHosts,
        ) => FailureClass::Config,
        StoreError::Elastic(_) => FailureClass::Upstream,
        StoreError::Embedding(error) => embedding_class(error),
        StoreError::DimensionMismatch { .. }
        | StoreError::UnknownStrategy { .. }
        | StoreError::InvalidOptions(_) => FailureClass::Config,
    }
}

/// Result of one `/upload` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Target index.
    pub index: String,
    /// Number of files received.
    pub uploaded_files: usize,
    /// Documents produced by the loader across all files.
    pub docs: usize,
    /// Chunks produced by the splitter and written.
    pub chunks: usize,
}

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// Chunk text.
    pub content: String,
    /// Retrieval score, when the strategy produced one.
    pub score: Option<f64>,
    /// Stored metadata without the score.
    pub metadata: Metadata,
}

impl From<Document> for Match {
    fn from(document: Document) -> Self {
        let mut metadata = document.metadata;
        let score = metadata.remove(SCORE_KEY).as_ref().and_then(Value::as_f64);
        Self {
            content: document.content,
            score,
            metadata,
        }
    }
}

/// Result of one `/query` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// Query text as received.
    pub query: String,
    /// Ranked matches.
    pub matches: Vec<Match>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn match_moves_score_out_of_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("score".into(), json!(0.75));
        metadata.insert("project".into(), json!("demo"));
        let found = Match::from(Document::new("text", metadata));

        assert_eq!(found.score, Some(0.75));
        assert_eq!(found.metadata.len(), 1);
        assert!(!found.metadata.contains_key("score"));

        let unscored = Match::from(Document::new("text", Metadata::new()));
        assert_eq!(unscored.score, None);
    }

    #[test]
    fn failures_are_classified() {
        let unknown = SplitterError::Unknown {
            name: "X".into(),
            valid: "A".into(),
        };
        assert_eq!(PipelineError::from(unknown).class(), FailureClass::Config);

        let upstream = ElasticError::UnexpectedStatus {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        assert_eq!(PipelineError::from(upstream).class(), FailureClass::Upstream);

        let pdf = PipelineError::Loader {
            file: "a.pdf".into(),
            source: LoaderError::Pdf("bad xref".into()),
        };
        assert_eq!(pdf.class(), FailureClass::Extraction);

        let io = PipelineError::Loader {
            file: "a.txt".into(),
            source: LoaderError::Io(std::io::Error::other("gone")),
        };
        assert_eq!(io.class(), FailureClass::Internal);

        let mismatch = StoreError::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(PipelineError::from(mismatch).class(), FailureClass::Config);
    }
}
