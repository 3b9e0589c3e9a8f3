//! Text plus metadata, the shape every pipeline stage exchanges.
//!
//! Loaders produce documents, splitters turn each one into chunk documents that inherit its
//! metadata, and retrieval hits are mapped back into the same shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata attached to a document or chunk.
pub type Metadata = Map<String, Value>;

/// Metadata key recording the uploaded file a chunk came from.
pub const SOURCE_FILE_KEY: &str = "source_file";

/// Metadata key carrying a retrieval score.
pub const SCORE_KEY: &str = "score";

/// Unit of text flowing through the pipeline: loader output, splitter output, and retrieval hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Text content.
    pub content: String,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Build a document from its content and metadata.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// Merge `extra` over the current metadata, overwriting existing keys.
    pub fn merge_metadata(&mut self, extra: &Metadata) {
        for (key, value) in extra {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}
