//! File loaders turning a staged upload into its initial documents.
//!
//! The built-in [`FileLoader`] understands plain text, Markdown, HTML, and PDF. Format is
//! detected from the file extension (scratch copies keep the upload's suffix) unless the
//! `file_type` option overrides it. The loader mode decides the decomposition:
//!
//! - `single`: the whole file becomes one document;
//! - `paged`: one document per PDF page, or per form-feed separated page for text formats;
//! - `elements`: one document per block (title, list item, narrative paragraph).

pub mod html;
mod pdf;

use crate::document::{Document, Metadata};
use crate::schema::{LoaderCfg, LoaderMode, Options};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

static BLOCK_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid block break pattern"));
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s").expect("valid ordered item pattern"));

const TITLE_MAX_CHARS: usize = 80;

/// Errors raised while extracting text from an uploaded file.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Scratch file could not be read.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
    /// PDF structure or content stream could not be decoded.
    #[error("Failed to parse PDF: {0}")]
    Pdf(String),
    /// Loader options did not match the expected shape.
    #[error("Invalid loader options: {0}")]
    InvalidOptions(String),
}

/// Source formats the built-in loader can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// UTF-8 (lossy) plain text.
    Text,
    /// Markdown, loaded verbatim.
    Markdown,
    /// HTML, converted to text.
    Html,
    /// PDF, text extracted per page.
    Pdf,
}

impl FileType {
    /// Guess the format from the file extension, defaulting to plain text.
    pub fn detect(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("html" | "htm" | "xhtml") => Self::Html,
            Some("md" | "markdown") => Self::Markdown,
            _ => Self::Text,
        }
    }

    /// Lowercase label stored in document metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }
}

/// Options accepted under `loader.kwargs`. Unrecognized keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Force a format instead of detecting it from the extension.
    pub file_type: Option<FileType>,
    /// Page delimiter for text formats in `paged` mode.
    pub page_separator: String,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            file_type: None,
            page_separator: "\u{c}".to_string(),
        }
    }
}

/// Resolved loader configuration for one request.
#[derive(Debug, Clone)]
pub struct LoaderSpec {
    /// Decomposition policy.
    pub mode: LoaderMode,
    /// Parsed options.
    pub options: LoaderOptions,
}

impl LoaderSpec {
    /// Validate the loader section of an upload request.
    pub fn from_cfg(cfg: &LoaderCfg) -> Result<Self, LoaderError> {
        Ok(Self {
            mode: cfg.mode,
            options: parse_options(&cfg.kwargs)?,
        })
    }
}

fn parse_options(kwargs: &Options) -> Result<LoaderOptions, LoaderError> {
    serde_json::from_value(Value::Object(kwargs.clone()))
        .map_err(|error| LoaderError::InvalidOptions(error.to_string()))
}

/// Turns a file on disk into a sequence of documents.
///
/// Implementations are synchronous; callers run them on the blocking pool.
pub trait DocumentLoader: Send + Sync {
    /// Load `path` according to `spec`.
    fn load(&self, path: &Path, spec: &LoaderSpec) -> Result<Vec<Document>, LoaderError>;
}

/// Built-in loader for text, Markdown, HTML, and PDF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path, spec: &LoaderSpec) -> Result<Vec<Document>, LoaderError> {
        let file_type = spec
            .options
            .file_type
            .unwrap_or_else(|| FileType::detect(path));

        let pages: Vec<(Option<u32>, String)> = match file_type {
            FileType::Pdf => pdf::extract_pages(path)?
                .into_iter()
                .map(|(number, text)| (Some(number), text))
                .collect(),
            FileType::Html => vec![(None, html::html_to_text(&read_text(path)?))],
            FileType::Text | FileType::Markdown => vec![(None, read_text(path)?)],
        };

        let mut base = Metadata::new();
        base.insert("source".into(), Value::String(path.display().to_string()));
        base.insert("file_type".into(), Value::String(file_type.as_str().into()));

        let documents = match spec.mode {
            LoaderMode::Single => load_single(pages, base),
            LoaderMode::Paged => load_paged(pages, &spec.options.page_separator, base),
            LoaderMode::Elements => load_elements(pages, base),
        };

        tracing::debug!(
            path = %path.display(),
            file_type = file_type.as_str(),
            mode = spec.mode.as_str(),
            documents = documents.len(),
            "Loaded file"
        );
        Ok(documents)
    }
}

fn read_text(path: &Path) -> Result<String, LoaderError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn load_single(pages: Vec<(Option<u32>, String)>, base: Metadata) -> Vec<Document> {
    let content = if pages.len() == 1 {
        pages.into_iter().map(|(_, text)| text).collect::<String>()
    } else {
        pages
            .into_iter()
            .map(|(_, text)| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    vec![Document::new(content, base)]
}

fn load_paged(
    pages: Vec<(Option<u32>, String)>,
    separator: &str,
    base: Metadata,
) -> Vec<Document> {
    let unpaginated = matches!(pages.as_slice(), [(None, _)]) && !separator.is_empty();
    let numbered: Vec<(u32, String)> = if unpaginated {
        pages
            .iter()
            .flat_map(|(_, text)| text.split(separator))
            .enumerate()
            .map(|(index, page)| (index as u32 + 1, page.to_string()))
            .collect()
    } else {
        pages
            .into_iter()
            .enumerate()
            .map(|(index, (number, text))| (number.unwrap_or(index as u32 + 1), text))
            .collect()
    };

    numbered
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(number, text)| {
            let mut metadata = base.clone();
            metadata.insert("page_number".into(), Value::from(number));
            Document::new(text.trim(), metadata)
        })
        .collect()
}

fn load_elements(pages: Vec<(Option<u32>, String)>, base: Metadata) -> Vec<Document> {
    let mut documents = Vec::new();
    for (page_number, text) in pages {
        for block in BLOCK_BREAK.split(&text) {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let mut metadata = base.clone();
            metadata.insert("category".into(), Value::String(classify(block).into()));
            metadata.insert("element_index".into(), Value::from(documents.len()));
            if let Some(number) = page_number {
                metadata.insert("page_number".into(), Value::from(number));
            }
            documents.push(Document::new(block, metadata));
        }
    }
    documents
}

fn classify(block: &str) -> &'static str {
    if block.starts_with('#') {
        return "Title";
    }

    let is_list = block.lines().all(|line| {
        let line = line.trim_start();
        line.starts_with("- ")
            || line.starts_with("* ")
            || line.starts_with("• ")
            || ORDERED_ITEM.is_match(line)
    });
    if is_list {
        return "ListItem";
    }

    let single_line = !block.contains('\n');
    let terminated = block.ends_with(['.', '!', '?', ':', ';', ',']);
    if single_line
        && !terminated
        && block.chars().count() <= TITLE_MAX_CHARS
        && block.chars().any(char::is_alphabetic)
    {
        return "Title";
    }

    "NarrativeText"
}
