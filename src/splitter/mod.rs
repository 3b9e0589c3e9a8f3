//! Splitter registry and the splitter implementations it resolves to.
//!
//! [`SplitterKind`] is the closed set of splitter names a request may ask for. Each kind
//! declares how it is constructed:
//!
//! - [`Construction::Sized`]: bounded by `chunk_size`/`chunk_overlap` plus its own options;
//! - [`Construction::HeaderBased`]: structural splitting driven only by its own options;
//! - [`Construction::OptionsOnly`]: not a generic text splitter, built from raw options only.
//!
//! Options arrive as the free-form `splitter.kwargs` map and are deserialized strictly, so a
//! misspelled option fails the request instead of being silently dropped.

mod character;
mod header;
mod json;
mod sentence;
mod token;

pub use character::{CharacterSplitter, Language, RecursiveSplitter};
pub use header::{HtmlHeaderSplitter, MarkdownHeaderSplitter};
use header::MarkdownSyntaxOptions;
pub use json::RecursiveJsonSplitter;
pub use sentence::SentenceSplitter;
pub use token::TokenSplitter;

use crate::document::{Document, Metadata, SOURCE_FILE_KEY};
use crate::schema::{Options, SplitterCfg};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while resolving or constructing a splitter.
#[derive(Debug, Error)]
pub enum SplitterError {
    /// Requested splitter name is not registered.
    #[error("Unknown splitter '{name}'. Valid options: {valid}")]
    Unknown {
        /// Name supplied by the client.
        name: String,
        /// Comma-separated list of registered names.
        valid: String,
    },
    /// Size-based splitter configured with a zero budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap larger than the chunk itself.
    #[error("Got a larger chunk overlap ({overlap}) than chunk size ({size}), should be smaller")]
    OverlapExceedsSize {
        /// Configured chunk size.
        size: usize,
        /// Configured overlap.
        overlap: usize,
    },
    /// Options did not match what the splitter accepts.
    #[error("Invalid options for {splitter}: {reason}")]
    InvalidOptions {
        /// Splitter the options were meant for.
        splitter: &'static str,
        /// Deserialization or validation detail.
        reason: String,
    },
    /// Tokenizer resources were unavailable for the configured encoding.
    #[error("failed to initialize tokenizer '{encoding}': {source}")]
    Tokenizer {
        /// Encoding or model we attempted to load.
        encoding: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: anyhow::Error,
    },
}

/// How a splitter kind is instantiated from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construction {
    /// Takes `chunk_size` and `chunk_overlap`.
    Sized,
    /// Structural header splitter; takes only its own options.
    HeaderBased,
    /// Not a generic text splitter; takes only its raw options.
    OptionsOnly,
}

/// Every splitter a request may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitterKind {
    /// Split on a single separator, then merge up to the chunk size.
    Character,
    /// Split recursively on a separator hierarchy.
    RecursiveCharacter,
    /// Token-budgeted semantic chunks.
    Token,
    /// Token-budgeted chunks sized by `tokens_per_chunk`.
    SentenceTransformersToken,
    /// Sentence-level splitting (NLTK flavor).
    Nltk,
    /// Sentence-level splitting (spaCy flavor).
    Spacy,
    /// Sentence-level splitting (KoNLPy flavor).
    Konlpy,
    /// Recursive splitting on LaTeX structure.
    Latex,
    /// Recursive splitting on Python definitions.
    PythonCode,
    /// Recursive splitting on JavaScript/JSX statements.
    JsFramework,
    /// Structure-preserving JSON splitting.
    RecursiveJson,
    /// Recursive splitting on Markdown structure.
    Markdown,
    /// One chunk per Markdown section, split on every heading level by default.
    ExperimentalMarkdownSyntax,
    /// One chunk per Markdown section, header values in metadata.
    MarkdownHeader,
    /// One chunk per HTML header section, header values in metadata.
    HtmlHeader,
    /// One chunk per HTML section including its heading.
    HtmlSection,
    /// HTML sections capped at `max_chunk_size`, header values kept on every piece.
    HtmlSemanticPreserving,
}

impl SplitterKind {
    /// Registered kinds, in the order reported to clients.
    pub const ALL: [Self; 17] = [
        Self::Character,
        Self::RecursiveCharacter,
        Self::Token,
        Self::SentenceTransformersToken,
        Self::Spacy,
        Self::Nltk,
        Self::Konlpy,
        Self::Latex,
        Self::PythonCode,
        Self::JsFramework,
        Self::RecursiveJson,
        Self::Markdown,
        Self::ExperimentalMarkdownSyntax,
        Self::MarkdownHeader,
        Self::HtmlHeader,
        Self::HtmlSection,
        Self::HtmlSemanticPreserving,
    ];

    /// Name clients use to select this splitter.
    pub fn name(self) -> &'static str {
        match self {
            Self::Character => "CharacterTextSplitter",
            Self::RecursiveCharacter => "RecursiveCharacterTextSplitter",
            Self::Token => "TokenTextSplitter",
            Self::SentenceTransformersToken => "SentenceTransformersTokenTextSplitter",
            Self::Nltk => "NLTKTextSplitter",
            Self::Spacy => "SpacyTextSplitter",
            Self::Konlpy => "KonlpyTextSplitter",
            Self::Latex => "LatexTextSplitter",
            Self::PythonCode => "PythonCodeTextSplitter",
            Self::JsFramework => "JSFrameworkTextSplitter",
            Self::RecursiveJson => "RecursiveJsonSplitter",
            Self::Markdown => "MarkdownTextSplitter",
            Self::ExperimentalMarkdownSyntax => "ExperimentalMarkdownSyntaxTextSplitter",
            Self::MarkdownHeader => "MarkdownHeaderTextSplitter",
            Self::HtmlHeader => "HTMLHeaderTextSplitter",
            Self::HtmlSection => "HTMLSectionSplitter",
            Self::HtmlSemanticPreserving => "HTMLSemanticPreservingSplitter",
        }
    }

    /// Construction style for this kind.
    pub fn construction(self) -> Construction {
        match self {
            Self::MarkdownHeader | Self::HtmlHeader => Construction::HeaderBased,
            Self::RecursiveJson
            | Self::HtmlSection
            | Self::ExperimentalMarkdownSyntax
            | Self::HtmlSemanticPreserving => Construction::OptionsOnly,
            Self::Character
            | Self::RecursiveCharacter
            | Self::Token
            | Self::SentenceTransformersToken
            | Self::Nltk
            | Self::Spacy
            | Self::Konlpy
            | Self::Latex
            | Self::PythonCode
            | Self::JsFramework
            | Self::Markdown => Construction::Sized,
        }
    }

    /// Comma-separated list of every registered name.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SplitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SplitterKind {
    type Err = SplitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| SplitterError::Unknown {
                name: s.to_string(),
                valid: Self::valid_names(),
            })
    }
}

/// Size budget shared by all size-based splitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    /// Upper bound on a chunk's length.
    pub size: usize,
    /// Length carried over between adjacent chunks.
    pub overlap: usize,
}

impl ChunkBounds {
    /// Validate a size/overlap pair.
    pub fn new(size: usize, overlap: usize) -> Result<Self, SplitterError> {
        if size == 0 {
            return Err(SplitterError::InvalidChunkSize);
        }
        if overlap > size {
            return Err(SplitterError::OverlapExceedsSize { size, overlap });
        }
        Ok(Self { size, overlap })
    }
}

/// Piece of text produced by a splitter plus any metadata the splitter derived for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    /// Chunk text.
    pub text: String,
    /// Splitter-derived metadata (header values, start offsets).
    pub metadata: Metadata,
}

impl Fragment {
    /// Fragment without derived metadata.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Splits text into chunks.
pub trait TextSplitter: Send + Sync {
    /// Split a single text.
    fn split_text(&self, text: &str) -> Vec<Fragment>;

    /// Split documents; every chunk inherits its parent's metadata plus the fragment's own.
    ///
    /// Fragment keys override parent keys except `source_file`, which always names the upload.
    fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .flat_map(|document| {
                let source_file = document.metadata.get(SOURCE_FILE_KEY);
                self.split_text(&document.content)
                    .into_iter()
                    .map(move |fragment| {
                        let mut metadata = document.metadata.clone();
                        metadata.extend(fragment.metadata);
                        if let Some(source_file) = source_file {
                            metadata.insert(SOURCE_FILE_KEY.into(), source_file.clone());
                        }
                        Document::new(fragment.text, metadata)
                    })
            })
            .collect()
    }
}

/// Resolve and construct the splitter named in `cfg`.
pub fn build_splitter(cfg: &SplitterCfg) -> Result<Box<dyn TextSplitter>, SplitterError> {
    let kind: SplitterKind = cfg.kind.parse()?;
    let kwargs = &cfg.kwargs;

    let splitter: Box<dyn TextSplitter> = match kind.construction() {
        Construction::Sized => {
            let bounds = ChunkBounds::new(cfg.chunk_size, cfg.chunk_overlap)?;
            build_sized(kind, bounds, kwargs)?
        }
        Construction::HeaderBased | Construction::OptionsOnly => build_structural(kind, kwargs)?,
    };

    tracing::debug!(
        splitter = kind.name(),
        construction = ?kind.construction(),
        chunk_size = cfg.chunk_size,
        chunk_overlap = cfg.chunk_overlap,
        "Splitter constructed"
    );
    Ok(splitter)
}

fn build_sized(
    kind: SplitterKind,
    bounds: ChunkBounds,
    kwargs: &Options,
) -> Result<Box<dyn TextSplitter>, SplitterError> {
    Ok(match kind {
        SplitterKind::Character => Box::new(CharacterSplitter::new(
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::RecursiveCharacter => Box::new(RecursiveSplitter::new(
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::Markdown => Box::new(RecursiveSplitter::for_language(
            Language::Markdown,
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::Latex => Box::new(RecursiveSplitter::for_language(
            Language::Latex,
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::PythonCode => Box::new(RecursiveSplitter::for_language(
            Language::Python,
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::JsFramework => Box::new(RecursiveSplitter::for_language(
            Language::JavaScript,
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::Token => Box::new(TokenSplitter::new(bounds, parse_options(kind, kwargs)?)?),
        SplitterKind::SentenceTransformersToken => Box::new(TokenSplitter::sentence_transformers(
            bounds,
            parse_options(kind, kwargs)?,
        )?),
        SplitterKind::Nltk | SplitterKind::Spacy | SplitterKind::Konlpy => Box::new(
            SentenceSplitter::new(kind.name(), bounds, parse_options(kind, kwargs)?)?,
        ),
        SplitterKind::MarkdownHeader
        | SplitterKind::ExperimentalMarkdownSyntax
        | SplitterKind::HtmlHeader
        | SplitterKind::HtmlSection
        | SplitterKind::HtmlSemanticPreserving
        | SplitterKind::RecursiveJson => build_structural(kind, kwargs)?,
    })
}

fn build_structural(
    kind: SplitterKind,
    kwargs: &Options,
) -> Result<Box<dyn TextSplitter>, SplitterError> {
    Ok(match kind {
        SplitterKind::MarkdownHeader => {
            Box::new(MarkdownHeaderSplitter::new(parse_options(kind, kwargs)?))
        }
        SplitterKind::ExperimentalMarkdownSyntax => {
            let options: MarkdownSyntaxOptions = parse_options(kind, kwargs)?;
            Box::new(MarkdownHeaderSplitter::new(options.into()))
        }
        SplitterKind::HtmlHeader => Box::new(HtmlHeaderSplitter::headers(parse_options(
            kind, kwargs,
        )?)),
        SplitterKind::HtmlSection => Box::new(HtmlHeaderSplitter::sections(parse_options(
            kind, kwargs,
        )?)),
        SplitterKind::HtmlSemanticPreserving => {
            Box::new(HtmlHeaderSplitter::semantic(parse_options(kind, kwargs)?)?)
        }
        SplitterKind::RecursiveJson => {
            Box::new(RecursiveJsonSplitter::new(parse_options(kind, kwargs)?)?)
        }
        other => {
            return Err(SplitterError::InvalidOptions {
                splitter: other.name(),
                reason: "splitter requires chunk_size and chunk_overlap".into(),
            });
        }
    })
}

fn parse_options<T: DeserializeOwned>(
    kind: SplitterKind,
    kwargs: &Options,
) -> Result<T, SplitterError> {
    serde_json::from_value(Value::Object(kwargs.clone())).map_err(|error| {
        SplitterError::InvalidOptions {
            splitter: kind.name(),
            reason: error.to_string(),
        }
    })
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(kind: &str, chunk_size: usize, chunk_overlap: usize, kwargs: Value) -> SplitterCfg {
        SplitterCfg {
            kind: kind.to_string(),
            chunk_size,
            chunk_overlap,
            kwargs: kwargs.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn every_registered_name_resolves_to_itself() {
        for kind in SplitterKind::ALL {
            assert_eq!(kind.name().parse::<SplitterKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn unknown_name_lists_valid_options() {
        let error = "SemanticChunker".parse::<SplitterKind>().unwrap_err();
        let message = error.to_string();
        assert!(message.starts_with("Unknown splitter 'SemanticChunker'"));
        for kind in SplitterKind::ALL {
            assert!(message.contains(kind.name()), "missing {kind}");
        }
    }

    #[test]
    fn header_splitters_ignore_size_settings() {
        // An overlap larger than the chunk size would be rejected for sized splitters.
        let splitter = build_splitter(&cfg("MarkdownHeaderTextSplitter", 10, 50, json!({})))
            .expect("header splitter builds");
        let fragments = splitter.split_text("# A\nbody");
        assert_eq!(fragments.len(), 1);

        assert!(build_splitter(&cfg("HTMLHeaderTextSplitter", 0, 0, json!({}))).is_ok());
        assert!(build_splitter(&cfg("RecursiveJsonSplitter", 0, 0, json!({}))).is_ok());
    }

    #[test]
    fn sized_splitters_validate_bounds() {
        let error = build_splitter(&cfg("CharacterTextSplitter", 10, 20, json!({}))).err();
        assert!(matches!(
            error,
            Some(SplitterError::OverlapExceedsSize {
                size: 10,
                overlap: 20
            })
        ));
        let error = build_splitter(&cfg("RecursiveCharacterTextSplitter", 0, 0, json!({}))).err();
        assert!(matches!(error, Some(SplitterError::InvalidChunkSize)));
    }

    #[test]
    fn unknown_options_are_rejected() {
        let error = build_splitter(&cfg(
            "RecursiveCharacterTextSplitter",
            100,
            10,
            json!({ "separatorz": ["\n"] }),
        ))
        .err();
        assert!(matches!(
            error,
            Some(SplitterError::InvalidOptions {
                splitter: "RecursiveCharacterTextSplitter",
                ..
            })
        ));
    }

    #[test]
    fn split_documents_inherits_parent_metadata() {
        let splitter = build_splitter(&cfg(
            "CharacterTextSplitter",
            10,
            0,
            json!({ "separator": " " }),
        ))
        .expect("splitter");
        let mut metadata = Metadata::new();
        metadata.insert("source_file".into(), json!("notes.txt"));
        let document = Document::new("alpha beta gamma", metadata);

        let chunks = splitter.split_documents(&[document]);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.metadata["source_file"], "notes.txt");
        }
    }

    #[test]
    fn every_kind_builds_with_defaults() {
        for kind in SplitterKind::ALL {
            let built = build_splitter(&cfg(kind.name(), 1024, 128, json!({})));
            assert!(built.is_ok(), "{kind} failed to build");
        }
    }

    #[test]
    fn header_values_never_replace_the_source_file() {
        let splitter = build_splitter(&cfg(
            "MarkdownHeaderTextSplitter",
            0,
            0,
            json!({ "headers_to_split_on": [["#", "source_file"]] }),
        ))
        .expect("splitter");
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_FILE_KEY.into(), json!("notes.md"));
        metadata.insert("project".into(), json!("demo"));
        let document = Document::new("# Intro\nbody text", metadata);

        let chunks = splitter.split_documents(&[document]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "body text");
        assert_eq!(chunks[0].metadata[SOURCE_FILE_KEY], "notes.md");
        assert_eq!(chunks[0].metadata["project"], "demo");
    }

    #[test]
    fn recovered_names_resolve_to_their_counterparts() {
        let cases = [
            ("SentenceTransformersTokenTextSplitter", Construction::Sized),
            ("KonlpyTextSplitter", Construction::Sized),
            ("ExperimentalMarkdownSyntaxTextSplitter", Construction::OptionsOnly),
            ("HTMLSemanticPreservingSplitter", Construction::OptionsOnly),
        ];
        for (name, construction) in cases {
            let kind: SplitterKind = name.parse().expect("registered");
            assert_eq!(kind.construction(), construction, "{name}");
        }

        let konlpy = build_splitter(&cfg("KonlpyTextSplitter", 20, 0, json!({})))
            .expect("konlpy splitter");
        let chunks = konlpy.split_text("첫 번째 문장입니다. 두 번째 문장입니다.");
        assert_eq!(chunks.len(), 2);

        let tokens = build_splitter(&cfg(
            "SentenceTransformersTokenTextSplitter",
            1024,
            0,
            json!({ "tokens_per_chunk": 3 }),
        ))
        .expect("token splitter");
        assert!(tokens.split_text("one two three four five six seven").len() > 1);

        let markdown = build_splitter(&cfg(
            "ExperimentalMarkdownSyntaxTextSplitter",
            0,
            0,
            json!({ "strip_headers": false }),
        ))
        .expect("markdown syntax splitter");
        let chunks = markdown.split_text("# A\none\n##### E\nfive");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "##### E\nfive");
        assert_eq!(chunks[1].metadata["Header 5"], "E");

        let html = build_splitter(&cfg(
            "HTMLSemanticPreservingSplitter",
            0,
            0,
            json!({ "max_chunk_size": 500 }),
        ))
        .expect("html semantic splitter");
        let chunks = html.split_text("<h1>Main</h1><p>Body.</p>");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Main\n\nBody.");
        assert_eq!(chunks[0].metadata["Header 1"], "Main");
    }
}
