//! Size-bounded splitters built on `text-splitter`.
//!
//! `text-splitter` packs text into chunks of at most `chunk_size` characters. It cuts at the
//! coarsest boundary that still fits (blank lines, line breaks, sentences, words, graphemes) and
//! carries up to `chunk_overlap` characters into the following chunk. Whitespace separators are
//! those native levels. Any other separator marks document structure: the text is cut at every
//! match, neighbouring sections are packed together while they fit, and a section that is too
//! large on its own goes through `text-splitter`.

use super::{ChunkBounds, Fragment, SplitterError, TextSplitter, char_len};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::ops::Range;
use text_splitter::{Characters, ChunkConfig, MarkdownSplitter};

/// Separators `text-splitter` already ranks on its own.
const NATIVE_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];
const NATIVE_PATTERNS: [&str; 6] = [r"\n\n", r"\n", " ", r"\s", r"\s+", ""];

const LATEX_SEPARATORS: [&str; 15] = [
    "\n\\chapter{",
    "\n\\section{",
    "\n\\subsection{",
    "\n\\subsubsection{",
    "\n\\begin{enumerate}",
    "\n\\begin{itemize}",
    "\n\\begin{description}",
    "\n\\begin{list}",
    "\n\\begin{quote}",
    "\n\\begin{quotation}",
    "\n\\begin{verse}",
    "\n\\begin{verbatim}",
    "\n\\begin{align}",
    "$$",
    "$",
];

const PYTHON_SEPARATORS: [&str; 3] = ["\nclass ", "\ndef ", "\n\tdef "];

const JS_SEPARATORS: [&str; 11] = [
    "\nfunction ",
    "\nconst ",
    "\nlet ",
    "\nvar ",
    "\nclass ",
    "\nif ",
    "\nfor ",
    "\nwhile ",
    "\nswitch ",
    "\ncase ",
    "\ndefault ",
];

/// Languages with a built-in structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// Markdown headings, fences, rules, paragraphs.
    Markdown,
    /// LaTeX sectioning commands and environments.
    Latex,
    /// Python classes and functions.
    Python,
    /// JavaScript/JSX declarations and control flow.
    JavaScript,
}

impl Language {
    fn splitter_name(self) -> &'static str {
        match self {
            Self::Markdown => "MarkdownTextSplitter",
            Self::Latex => "LatexTextSplitter",
            Self::Python => "PythonCodeTextSplitter",
            Self::JavaScript => "JSFrameworkTextSplitter",
        }
    }

    /// Structural separators; Markdown is parsed by `MarkdownSplitter` instead.
    fn separators(self) -> &'static [&'static str] {
        match self {
            Self::Markdown => &[],
            Self::Latex => &LATEX_SEPARATORS,
            Self::Python => &PYTHON_SEPARATORS,
            Self::JavaScript => &JS_SEPARATORS,
        }
    }
}

/// Where a matched separator ends up after cutting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepSeparator {
    /// Separator belongs to neither neighbour.
    Discard,
    /// Separator opens the following section.
    Start,
    /// Separator closes the preceding section.
    End,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum KeepSeparatorOption {
    Flag(bool),
    Position(SeparatorPosition),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SeparatorPosition {
    Start,
    End,
}

impl From<KeepSeparatorOption> for KeepSeparator {
    fn from(option: KeepSeparatorOption) -> Self {
        match option {
            KeepSeparatorOption::Flag(false) => Self::Discard,
            KeepSeparatorOption::Flag(true)
            | KeepSeparatorOption::Position(SeparatorPosition::Start) => Self::Start,
            KeepSeparatorOption::Position(SeparatorPosition::End) => Self::End,
        }
    }
}

/// Options for `CharacterTextSplitter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CharacterOptions {
    separator: String,
    is_separator_regex: bool,
    keep_separator: Option<KeepSeparatorOption>,
    add_start_index: bool,
    strip_whitespace: bool,
}

impl Default for CharacterOptions {
    fn default() -> Self {
        Self {
            separator: "\n\n".into(),
            is_separator_regex: false,
            keep_separator: None,
            add_start_index: false,
            strip_whitespace: true,
        }
    }
}

/// Options for the recursive splitter family.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecursiveOptions {
    separators: Option<Vec<String>>,
    is_separator_regex: bool,
    keep_separator: Option<KeepSeparatorOption>,
    add_start_index: bool,
    strip_whitespace: bool,
}

impl Default for RecursiveOptions {
    fn default() -> Self {
        Self {
            separators: None,
            is_separator_regex: false,
            keep_separator: None,
            add_start_index: false,
            strip_whitespace: true,
        }
    }
}

enum Engine {
    Text(text_splitter::TextSplitter<Characters>),
    Markdown(MarkdownSplitter<Characters>),
}

impl Engine {
    fn chunks<'t>(&self, text: &'t str) -> Vec<(usize, &'t str)> {
        match self {
            Self::Text(splitter) => splitter.chunk_indices(text).collect(),
            Self::Markdown(splitter) => splitter.chunk_indices(text).collect(),
        }
    }
}

/// Cut points derived from the non-native separators.
struct Structure {
    pattern: Regex,
    keep: KeepSeparator,
}

impl Structure {
    /// Compile the separators `text-splitter` does not handle natively; `None` when none remain.
    fn compile<S: AsRef<str>>(
        separators: &[S],
        is_regex: bool,
        keep: KeepSeparator,
        splitter: &'static str,
    ) -> Result<Option<Self>, SplitterError> {
        let native: &[&str] = if is_regex {
            &NATIVE_PATTERNS
        } else {
            &NATIVE_SEPARATORS
        };
        let alternatives: Vec<String> = separators
            .iter()
            .map(|separator| separator.as_ref())
            .filter(|separator| !native.contains(separator))
            .map(|separator| {
                if is_regex {
                    format!("(?:{separator})")
                } else {
                    regex::escape(separator)
                }
            })
            .collect();
        if alternatives.is_empty() {
            return Ok(None);
        }

        let source = alternatives.join("|");
        let pattern = Regex::new(&source).map_err(|error| SplitterError::InvalidOptions {
            splitter,
            reason: format!("invalid separator pattern '{source}': {error}"),
        })?;
        Ok(Some(Self { pattern, keep }))
    }

    /// Byte ranges between cut points, skipping blank ones.
    fn sections(&self, text: &str) -> Vec<Range<usize>> {
        let mut sections = Vec::new();
        let mut last = 0;
        for found in self.pattern.find_iter(text) {
            let (end, next) = match self.keep {
                KeepSeparator::Discard => (found.start(), found.end()),
                KeepSeparator::Start => (found.start(), found.start()),
                KeepSeparator::End => (found.end(), found.end()),
            };
            sections.push(last..end);
            last = next;
        }
        sections.push(last..text.len());
        sections.retain(|section| !text[section.clone()].trim().is_empty());
        sections
    }
}

/// Size-bounded chunking shared by every character-counted splitter.
pub(crate) struct SizedChunker {
    engine: Engine,
    size: usize,
    structure: Option<Structure>,
    strip_whitespace: bool,
}

impl SizedChunker {
    /// Plain-text chunker.
    pub(crate) fn text(
        bounds: ChunkBounds,
        strip_whitespace: bool,
        splitter: &'static str,
    ) -> Result<Self, SplitterError> {
        let config = chunk_config(bounds, strip_whitespace, splitter)?;
        Ok(Self::with_engine(
            Engine::Text(text_splitter::TextSplitter::new(config)),
            bounds,
            strip_whitespace,
        ))
    }

    fn markdown(
        bounds: ChunkBounds,
        strip_whitespace: bool,
        splitter: &'static str,
    ) -> Result<Self, SplitterError> {
        let config = chunk_config(bounds, strip_whitespace, splitter)?;
        Ok(Self::with_engine(
            Engine::Markdown(MarkdownSplitter::new(config)),
            bounds,
            strip_whitespace,
        ))
    }

    fn with_engine(engine: Engine, bounds: ChunkBounds, strip_whitespace: bool) -> Self {
        Self {
            engine,
            size: bounds.size,
            structure: None,
            strip_whitespace,
        }
    }

    fn with_structure(mut self, structure: Option<Structure>) -> Self {
        self.structure = structure;
        self
    }

    /// Chunks of `text` with their byte offsets, in document order.
    pub(crate) fn chunk<'t>(&self, text: &'t str) -> Vec<(usize, &'t str)> {
        let Some(structure) = &self.structure else {
            return self.engine.chunks(text);
        };

        let mut chunks = Vec::new();
        let mut pending: Option<(Range<usize>, usize)> = None;
        for section in structure.sections(text) {
            let section_len = char_len(&text[section.clone()]);
            if section_len > self.size {
                if let Some((span, _)) = pending.take() {
                    self.push_span(text, span, &mut chunks);
                }
                let start = section.start;
                chunks.extend(
                    self.engine
                        .chunks(&text[section])
                        .into_iter()
                        .map(|(offset, chunk)| (start + offset, chunk)),
                );
                continue;
            }

            pending = match pending {
                Some((span, len)) => {
                    let grown = len + char_len(&text[span.end..section.end]);
                    if grown <= self.size {
                        Some((span.start..section.end, grown))
                    } else {
                        self.push_span(text, span, &mut chunks);
                        Some((section, section_len))
                    }
                }
                None => Some((section, section_len)),
            };
        }
        if let Some((span, _)) = pending {
            self.push_span(text, span, &mut chunks);
        }
        chunks
    }

    fn push_span<'t>(&self, text: &'t str, span: Range<usize>, chunks: &mut Vec<(usize, &'t str)>) {
        let raw = &text[span.clone()];
        let (offset, chunk) = if self.strip_whitespace {
            let trimmed = raw.trim_start();
            (span.start + raw.len() - trimmed.len(), trimmed.trim_end())
        } else {
            (span.start, raw)
        };
        if !chunk.is_empty() {
            chunks.push((offset, chunk));
        }
    }
}

fn chunk_config(
    bounds: ChunkBounds,
    strip_whitespace: bool,
    splitter: &'static str,
) -> Result<ChunkConfig<Characters>, SplitterError> {
    ChunkConfig::new(bounds.size)
        .with_trim(strip_whitespace)
        .with_overlap(bounds.overlap)
        .map_err(|error| SplitterError::InvalidOptions {
            splitter,
            reason: error.to_string(),
        })
}

/// Split on one separator, then pack the pieces up to the chunk size.
pub struct CharacterSplitter {
    chunker: SizedChunker,
    add_start_index: bool,
}

impl CharacterSplitter {
    const NAME: &'static str = "CharacterTextSplitter";

    /// Build a character splitter.
    pub fn new(bounds: ChunkBounds, options: CharacterOptions) -> Result<Self, SplitterError> {
        let keep = options
            .keep_separator
            .map(KeepSeparator::from)
            .unwrap_or(KeepSeparator::Discard);
        let structure = Structure::compile(
            std::slice::from_ref(&options.separator),
            options.is_separator_regex,
            keep,
            Self::NAME,
        )?;
        Ok(Self {
            chunker: SizedChunker::text(bounds, options.strip_whitespace, Self::NAME)?
                .with_structure(structure),
            add_start_index: options.add_start_index,
        })
    }
}

impl TextSplitter for CharacterSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        into_fragments(text, self.chunker.chunk(text), self.add_start_index)
    }
}

/// Split at the coarsest boundary that fits, honouring custom or language separators first.
pub struct RecursiveSplitter {
    chunker: SizedChunker,
    add_start_index: bool,
}

impl RecursiveSplitter {
    /// Build a recursive splitter with the default or user-supplied separators.
    pub fn new(bounds: ChunkBounds, options: RecursiveOptions) -> Result<Self, SplitterError> {
        Self::build("RecursiveCharacterTextSplitter", None, bounds, options)
    }

    /// Build a recursive splitter using a language's structure.
    pub fn for_language(
        language: Language,
        bounds: ChunkBounds,
        options: RecursiveOptions,
    ) -> Result<Self, SplitterError> {
        Self::build(language.splitter_name(), Some(language), bounds, options)
    }

    fn build(
        name: &'static str,
        language: Option<Language>,
        bounds: ChunkBounds,
        options: RecursiveOptions,
    ) -> Result<Self, SplitterError> {
        let keep = options
            .keep_separator
            .map(KeepSeparator::from)
            .unwrap_or(KeepSeparator::Start);
        let strip = options.strip_whitespace;

        let chunker = match (options.separators.as_deref(), language) {
            (Some(custom), _) => SizedChunker::text(bounds, strip, name)?.with_structure(
                Structure::compile(custom, options.is_separator_regex, keep, name)?,
            ),
            (None, Some(Language::Markdown)) => SizedChunker::markdown(bounds, strip, name)?,
            (None, Some(language)) => SizedChunker::text(bounds, strip, name)?
                .with_structure(Structure::compile(language.separators(), false, keep, name)?),
            (None, None) => SizedChunker::text(bounds, strip, name)?,
        };
        Ok(Self {
            chunker,
            add_start_index: options.add_start_index,
        })
    }
}

impl TextSplitter for RecursiveSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        into_fragments(text, self.chunker.chunk(text), self.add_start_index)
    }
}

/// Wrap chunks as fragments, recording their character offset when requested.
pub(crate) fn into_fragments(
    text: &str,
    chunks: Vec<(usize, &str)>,
    add_start_index: bool,
) -> Vec<Fragment> {
    // (byte offset, char offset) of the previous chunk, so offsets are counted incrementally.
    let mut cursor = (0usize, 0usize);
    chunks
        .into_iter()
        .map(|(offset, chunk)| {
            let mut fragment = Fragment::plain(chunk);
            if add_start_index {
                if offset < cursor.0 {
                    cursor = (0, 0);
                }
                cursor = (offset, cursor.1 + char_len(&text[cursor.0..offset]));
                fragment
                    .metadata
                    .insert("start_index".into(), Value::from(cursor.1));
            }
            fragment
        })
        .collect()
}
