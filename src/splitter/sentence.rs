//! Sentence-aware splitting for the NLTK, spaCy and KoNLPy splitter names.
//!
//! No linguistic model is loaded. `text-splitter` already treats Unicode sentence boundaries as
//! a semantic level between line breaks and words, so chunks hold whole sentences whenever they
//! fit and only fall back to word boundaries for a sentence longer than `chunk_size`.

use super::character::{SizedChunker, into_fragments};
use super::{ChunkBounds, Fragment, SplitterError, TextSplitter};
use serde::Deserialize;

/// Options for the sentence splitters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SentenceOptions {
    separator: String,
    strip_whitespace: bool,
}

impl Default for SentenceOptions {
    fn default() -> Self {
        Self {
            separator: "\n\n".into(),
            strip_whitespace: true,
        }
    }
}

/// Packs whole sentences into chunks up to the chunk size.
pub struct SentenceSplitter {
    chunker: SizedChunker,
}

impl SentenceSplitter {
    /// Build a sentence splitter registered under `name`.
    pub fn new(
        name: &'static str,
        bounds: ChunkBounds,
        options: SentenceOptions,
    ) -> Result<Self, SplitterError> {
        // Chunks keep the whitespace found between sentences in the source.
        tracing::debug!(
            splitter = name,
            separator = ?options.separator,
            "Sentence separator is not re-inserted"
        );
        Ok(Self {
            chunker: SizedChunker::text(bounds, options.strip_whitespace, name)?,
        })
    }
}

impl TextSplitter for SentenceSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        into_fragments(text, self.chunker.chunk(text), false)
    }
}
