//! Structural splitters that cut at Markdown or HTML headings.
//!
//! Chunk boundaries follow document structure rather than size; the text of every enclosing
//! heading is recorded in the chunk metadata under the configured key (`Header 1`, ...).

use super::character::SizedChunker;
use super::{ChunkBounds, Fragment, SplitterError, TextSplitter};
use crate::document::Metadata;
use crate::loader::html::{html_to_text, inline_text};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::ops::Range;
use std::sync::LazyLock;

/// Opening heading tag; quoted attribute values may contain `>`.
static HEADING_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<h([1-6])\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("valid heading pattern")
});
static HEADING_CLOSE: LazyLock<[Regex; 6]> = LazyLock::new(|| {
    [1, 2, 3, 4, 5, 6].map(|level| {
        Regex::new(&format!(r"(?i)</h{level}\s*>")).expect("valid closing heading pattern")
    })
});

/// A heading element located in the source HTML.
#[derive(Debug, PartialEq, Eq)]
struct Heading {
    /// Whole element, open tag through close tag.
    span: Range<usize>,
    level: usize,
    inner: Range<usize>,
}

/// Next heading at or after `from` whose closing tag has the same level.
///
/// An opening tag without a matching close is left in place as ordinary markup.
fn next_heading(html: &str, mut from: usize) -> Option<Heading> {
    while let Some(open) = HEADING_OPEN.captures_at(html, from) {
        let (whole, level) = (open.get(0)?, open.get(1)?);
        let level: usize = level.as_str().parse().ok()?;
        let close = HEADING_CLOSE
            .get(level - 1)
            .and_then(|pattern| pattern.find_at(html, whole.end()));
        match close {
            Some(close) => {
                return Some(Heading {
                    span: whole.start()..close.end(),
                    level,
                    inner: whole.end()..close.start(),
                });
            }
            None => from = whole.end(),
        }
    }
    None
}

fn default_markdown_headers() -> Vec<(String, String)> {
    vec![
        ("#".into(), "Header 1".into()),
        ("##".into(), "Header 2".into()),
        ("###".into(), "Header 3".into()),
    ]
}

fn default_html_headers() -> Vec<(String, String)> {
    vec![
        ("h1".into(), "Header 1".into()),
        ("h2".into(), "Header 2".into()),
        ("h3".into(), "Header 3".into()),
    ]
}

/// Options for `MarkdownHeaderTextSplitter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownHeaderOptions {
    headers_to_split_on: Vec<(String, String)>,
    return_each_line: bool,
    strip_headers: bool,
}

impl Default for MarkdownHeaderOptions {
    fn default() -> Self {
        Self {
            headers_to_split_on: default_markdown_headers(),
            return_each_line: false,
            strip_headers: true,
        }
    }
}

/// Options for `ExperimentalMarkdownSyntaxTextSplitter`; every heading level splits by default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownSyntaxOptions {
    headers_to_split_on: Option<Vec<(String, String)>>,
    return_each_line: bool,
    strip_headers: Option<bool>,
}

impl From<MarkdownSyntaxOptions> for MarkdownHeaderOptions {
    fn from(options: MarkdownSyntaxOptions) -> Self {
        let headers = options.headers_to_split_on.unwrap_or_else(|| {
            (1..=6)
                .map(|level| ("#".repeat(level), format!("Header {level}")))
                .collect()
        });
        Self {
            headers_to_split_on: headers,
            return_each_line: options.return_each_line,
            strip_headers: options.strip_headers.unwrap_or(true),
        }
    }
}

/// Options for `HTMLHeaderTextSplitter` and `HTMLSectionSplitter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlHeaderOptions {
    headers_to_split_on: Vec<(String, String)>,
}

impl Default for HtmlHeaderOptions {
    fn default() -> Self {
        Self {
            headers_to_split_on: default_html_headers(),
        }
    }
}

/// Options for `HTMLSemanticPreservingSplitter`: sections, then a size cap per section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlSemanticOptions {
    headers_to_split_on: Vec<(String, String)>,
    max_chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for HtmlSemanticOptions {
    fn default() -> Self {
        Self {
            headers_to_split_on: default_html_headers(),
            max_chunk_size: 1000,
            chunk_overlap: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveHeader {
    level: usize,
    key: String,
    value: String,
}

fn header_metadata(stack: &[ActiveHeader]) -> Metadata {
    stack
        .iter()
        .map(|header| (header.key.clone(), Value::String(header.value.clone())))
        .collect()
}

fn enter_header(stack: &mut Vec<ActiveHeader>, header: ActiveHeader) {
    stack.retain(|active| active.level < header.level);
    stack.push(header);
}

/// Splits Markdown into one chunk per section.
pub struct MarkdownHeaderSplitter {
    headers: Vec<(String, String)>,
    return_each_line: bool,
    strip_headers: bool,
}

impl MarkdownHeaderSplitter {
    /// Build a Markdown header splitter.
    pub fn new(options: MarkdownHeaderOptions) -> Self {
        let mut headers = options.headers_to_split_on;
        // Longest marker first so `##` is not mistaken for `#`.
        headers.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            headers,
            return_each_line: options.return_each_line,
            strip_headers: options.strip_headers,
        }
    }

    fn match_header<'a>(&'a self, line: &'a str) -> Option<(&'a str, &'a str)> {
        self.headers.iter().find_map(|(marker, key)| {
            let rest = line.strip_prefix(marker.as_str())?;
            if rest.is_empty() || rest.starts_with(' ') {
                Some((key.as_str(), rest.trim()))
            } else {
                None
            }
        })
    }
}

impl TextSplitter for MarkdownHeaderSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        let mut stack: Vec<ActiveHeader> = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        let mut fence: Option<&str> = None;

        let flush = |lines: &mut Vec<String>, stack: &[ActiveHeader], out: &mut Vec<Fragment>| {
            if lines.is_empty() {
                return;
            }
            let metadata = header_metadata(stack);
            if self.return_each_line {
                out.extend(lines.drain(..).map(|line| Fragment {
                    text: line,
                    metadata: metadata.clone(),
                }));
            } else {
                out.push(Fragment {
                    text: lines.join("\n"),
                    metadata,
                });
                lines.clear();
            }
        };

        for raw in text.lines() {
            let line = raw.trim();

            if let Some(marker) = fence {
                lines.push(raw.trim_end().to_string());
                if line.starts_with(marker) {
                    fence = None;
                }
                continue;
            }
            if let Some(marker) = ["```", "~~~"].into_iter().find(|m| line.starts_with(m)) {
                fence = Some(marker);
                lines.push(raw.trim_end().to_string());
                continue;
            }

            if let Some((key, value)) = self.match_header(line) {
                flush(&mut lines, &stack, &mut fragments);
                let level = line.chars().take_while(|c| *c == '#').count();
                enter_header(
                    &mut stack,
                    ActiveHeader {
                        level,
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                );
                if !self.strip_headers {
                    lines.push(line.to_string());
                }
                continue;
            }

            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        flush(&mut lines, &stack, &mut fragments);
        fragments
    }
}

/// Splits HTML at configured heading tags.
///
/// In header mode the heading text only appears in metadata; in section mode it also opens the
/// chunk content.
pub struct HtmlHeaderSplitter {
    headers: Vec<(String, String)>,
    include_heading: bool,
    section_limit: Option<SizedChunker>,
}

impl HtmlHeaderSplitter {
    /// `HTMLHeaderTextSplitter` behavior.
    pub fn headers(options: HtmlHeaderOptions) -> Self {
        Self::build(options, false)
    }

    /// `HTMLSectionSplitter` behavior.
    pub fn sections(options: HtmlHeaderOptions) -> Self {
        Self::build(options, true)
    }

    /// `HTMLSemanticPreservingSplitter` behavior: sections longer than `max_chunk_size` are
    /// split further and every piece keeps the section's header metadata.
    pub fn semantic(options: HtmlSemanticOptions) -> Result<Self, SplitterError> {
        let bounds = ChunkBounds::new(options.max_chunk_size, options.chunk_overlap)?;
        let limit = SizedChunker::text(bounds, true, "HTMLSemanticPreservingSplitter")?;
        let mut splitter = Self::build(
            HtmlHeaderOptions {
                headers_to_split_on: options.headers_to_split_on,
            },
            true,
        );
        splitter.section_limit = Some(limit);
        Ok(splitter)
    }

    fn build(options: HtmlHeaderOptions, include_heading: bool) -> Self {
        let headers = options
            .headers_to_split_on
            .into_iter()
            .map(|(tag, key)| (tag.to_ascii_lowercase(), key))
            .collect();
        Self {
            headers,
            include_heading,
            section_limit: None,
        }
    }

    fn key_for(&self, tag: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(configured, _)| configured == tag)
            .map(|(_, key)| key.as_str())
    }
}

impl TextSplitter for HtmlHeaderSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        let mut stack: Vec<ActiveHeader> = Vec::new();
        let mut parts: Vec<String> = Vec::new();
        let mut last = 0;

        let flush = |parts: &mut Vec<String>, stack: &[ActiveHeader], out: &mut Vec<Fragment>| {
            let content = parts.join("\n\n").trim().to_string();
            parts.clear();
            if !content.is_empty() {
                out.push(Fragment {
                    text: content,
                    metadata: header_metadata(stack),
                });
            }
        };

        while let Some(heading) = next_heading(text, last) {
            let between = html_to_text(&text[last..heading.span.start]);
            if !between.is_empty() {
                parts.push(between);
            }
            last = heading.span.end;

            let tag = format!("h{}", heading.level);
            let title = inline_text(&text[heading.inner]);
            match self.key_for(&tag) {
                Some(key) => {
                    flush(&mut parts, &stack, &mut fragments);
                    enter_header(
                        &mut stack,
                        ActiveHeader {
                            level: heading.level,
                            key: key.to_string(),
                            value: title.clone(),
                        },
                    );
                    if self.include_heading && !title.is_empty() {
                        parts.push(title);
                    }
                }
                None if !title.is_empty() => parts.push(title),
                None => {}
            }
        }

        let tail = html_to_text(&text[last..]);
        if !tail.is_empty() {
            parts.push(tail);
        }
        flush(&mut parts, &stack, &mut fragments);

        match &self.section_limit {
            Some(limit) => fragments
                .into_iter()
                .flat_map(|section| {
                    limit
                        .chunk(&section.text)
                        .into_iter()
                        .map(|(_, piece)| Fragment {
                            text: piece.to_string(),
                            metadata: section.metadata.clone(),
                        })
                        .collect::<Vec<_>>()
                })
                .collect(),
            None => fragments,
        }
    }
}
