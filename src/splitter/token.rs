//! Token-budgeted chunking.
//!
//! Text is segmented with `semchunk-rs`, which splits on the most meaningful boundary available
//! (paragraphs, lines, sentences, words) while keeping each chunk within the token budget. Token
//! counts come from a `tiktoken-rs` encoding. Overlap is applied afterwards as a sliding window of
//! trailing tokens from the previous chunk, trimmed so no chunk exceeds the budget.

use super::{ChunkBounds, Fragment, SplitterError, TextSplitter};
use semchunk_rs::Chunker;
use serde::Deserialize;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const DEFAULT_ENCODING: &str = "cl100k_base";

/// Options for `TokenTextSplitter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenOptions {
    encoding_name: String,
    model_name: Option<String>,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            encoding_name: DEFAULT_ENCODING.into(),
            model_name: None,
        }
    }
}

/// Options for `SentenceTransformersTokenTextSplitter`.
///
/// Sentence-transformers vocabularies are not bundled, so tokens are counted with the
/// `encoding_name` BPE; `model_name` only labels the splitter in logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SentenceTransformersOptions {
    model_name: String,
    tokens_per_chunk: Option<usize>,
    encoding_name: String,
}

impl Default for SentenceTransformersOptions {
    fn default() -> Self {
        Self {
            model_name: "sentence-transformers/all-mpnet-base-v2".into(),
            tokens_per_chunk: None,
            encoding_name: DEFAULT_ENCODING.into(),
        }
    }
}

/// Splits text into chunks bounded by a token count.
pub struct TokenSplitter {
    bounds: ChunkBounds,
    token_counter: TokenCounter,
}

impl TokenSplitter {
    /// Build a token splitter; `model_name` wins over `encoding_name` when both are set.
    pub fn new(bounds: ChunkBounds, options: TokenOptions) -> Result<Self, SplitterError> {
        let target = options
            .model_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(options.encoding_name.trim());
        Ok(Self::with_counter(bounds, tiktoken_counter(load_bpe(target)?)))
    }

    /// Build the sentence-transformers flavor; `tokens_per_chunk` replaces `chunk_size`.
    pub fn sentence_transformers(
        bounds: ChunkBounds,
        options: SentenceTransformersOptions,
    ) -> Result<Self, SplitterError> {
        let bounds = match options.tokens_per_chunk {
            Some(tokens) => ChunkBounds::new(tokens, bounds.overlap)?,
            None => bounds,
        };
        tracing::debug!(
            model = %options.model_name,
            encoding = %options.encoding_name,
            tokens_per_chunk = bounds.size,
            "Counting sentence-transformers tokens with a BPE encoding"
        );
        let bpe = load_bpe(options.encoding_name.trim())?;
        Ok(Self::with_counter(bounds, tiktoken_counter(bpe)))
    }

    fn with_counter(bounds: ChunkBounds, token_counter: TokenCounter) -> Self {
        Self {
            bounds,
            token_counter,
        }
    }

    fn chunks(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let counter_for_chunker = self.token_counter.clone();
        let chunker = Chunker::new(
            self.bounds.size,
            Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
        );
        let base_chunks = chunker.chunk(text);
        apply_overlap(
            base_chunks,
            self.bounds.size,
            self.bounds.overlap,
            &self.token_counter,
        )
    }
}

impl TextSplitter for TokenSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        self.chunks(text).into_iter().map(Fragment::plain).collect()
    }
}

/// BPE named by a `tiktoken` encoding (`cl100k_base`) or an OpenAI model (`gpt-4o`).
fn load_bpe(name: &str) -> Result<CoreBPE, SplitterError> {
    let name = if name.is_empty() { DEFAULT_ENCODING } else { name };
    let loaded = match name {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "p50k_edit" => p50k_edit(),
        "r50k_base" | "gpt2" => r50k_base(),
        model => get_bpe_from_model(model),
    };
    loaded.map_err(|source| SplitterError::Tokenizer {
        encoding: name.to_string(),
        source,
    })
}

fn tiktoken_counter(bpe: CoreBPE) -> TokenCounter {
    let bpe = Arc::new(bpe);
    Arc::new(move |segment: &str| bpe.encode_ordinary(segment).len())
}

/// Prefix each chunk after the first with up to `overlap` trailing tokens of its predecessor.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 {
        return chunks;
    }

    let mut iter = chunks.into_iter();
    let Some(mut previous) = iter.next() else {
        return Vec::new();
    };
    let mut overlapped = vec![previous.clone()];

    for current in iter {
        let tail = tail_within_budget(&previous, effective_overlap, token_counter);
        let mut combined = String::with_capacity(tail.len() + current.len() + 1);
        if !tail.is_empty() {
            combined.push_str(tail);
            if !tail.ends_with(char::is_whitespace) && !current.starts_with(char::is_whitespace) {
                combined.push(' ');
            }
        }
        combined.push_str(&current);
        overlapped.push(tail_within_budget(&combined, chunk_size, token_counter).to_string());
        previous = current;
    }

    overlapped
}

/// Longest suffix of `text` (left-trimmed) whose token count fits `budget`.
fn tail_within_budget<'a>(text: &'a str, budget: usize, token_counter: &TokenCounter) -> &'a str {
    if budget == 0 {
        return "";
    }

    let trimmed = text.trim_start();
    if token_counter.as_ref()(trimmed) <= budget {
        return trimmed;
    }

    for (offset, _) in text.char_indices().skip(1) {
        let candidate = text[offset..].trim_start();
        if token_counter.as_ref()(candidate) <= budget {
            return candidate;
        }
    }

    ""
}
