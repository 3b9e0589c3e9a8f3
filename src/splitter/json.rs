//! Size-bounded splitting of JSON documents that keeps the key path of every value.

use super::{Fragment, SplitterError, TextSplitter};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Options for `RecursiveJsonSplitter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecursiveJsonOptions {
    max_chunk_size: usize,
    min_chunk_size: Option<usize>,
    convert_lists: bool,
}

impl Default for RecursiveJsonOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            min_chunk_size: None,
            convert_lists: false,
        }
    }
}

/// Splits a JSON object into smaller objects, each re-serialized as one chunk.
///
/// Keys are packed into the current chunk while it stays under `max_chunk_size` serialized
/// characters; a value that does not fit is descended into, opening a new chunk once the current
/// one has reached `min_chunk_size`. Input that is not a JSON object becomes a single chunk.
pub struct RecursiveJsonSplitter {
    max_chunk_size: usize,
    min_chunk_size: usize,
    convert_lists: bool,
}

impl RecursiveJsonSplitter {
    /// Build a JSON splitter.
    pub fn new(options: RecursiveJsonOptions) -> Result<Self, SplitterError> {
        if options.max_chunk_size == 0 {
            return Err(SplitterError::InvalidOptions {
                splitter: "RecursiveJsonSplitter",
                reason: "max_chunk_size must be greater than zero".into(),
            });
        }
        let min_chunk_size = options
            .min_chunk_size
            .unwrap_or_else(|| options.max_chunk_size.saturating_sub(200).max(50));
        Ok(Self {
            max_chunk_size: options.max_chunk_size,
            min_chunk_size,
            convert_lists: options.convert_lists,
        })
    }

    fn split_value(
        &self,
        value: &Value,
        path: &mut Vec<String>,
        chunks: &mut Vec<Map<String, Value>>,
    ) {
        let Value::Object(object) = value else {
            if let Some(current) = chunks.last_mut() {
                set_nested(current, path, value.clone());
            }
            return;
        };

        for (key, child) in object {
            path.push(key.clone());
            let current_size = chunks.last().map(object_size).unwrap_or(0);
            let entry_size = object_size(&Map::from_iter([(key.clone(), child.clone())]));
            let remaining = self.max_chunk_size.saturating_sub(current_size);

            if entry_size < remaining {
                if let Some(current) = chunks.last_mut() {
                    set_nested(current, path, child.clone());
                }
            } else {
                if current_size >= self.min_chunk_size {
                    chunks.push(Map::new());
                }
                self.split_value(child, path, chunks);
            }
            path.pop();
        }
    }
}

impl TextSplitter for RecursiveJsonSplitter {
    fn split_text(&self, text: &str) -> Vec<Fragment> {
        let parsed: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(%error, "Input is not JSON; emitting it as a single chunk");
                return single_chunk(text);
            }
        };
        let parsed = if self.convert_lists {
            lists_to_objects(parsed)
        } else {
            parsed
        };
        if !parsed.is_object() {
            return single_chunk(text);
        }

        let mut chunks = vec![Map::new()];
        self.split_value(&parsed, &mut Vec::new(), &mut chunks);
        chunks
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| Fragment::plain(Value::Object(chunk).to_string()))
            .collect()
    }
}

fn single_chunk(text: &str) -> Vec<Fragment> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![Fragment::plain(trimmed)]
    }
}

fn object_size(object: &Map<String, Value>) -> usize {
    Value::Object(object.clone()).to_string().chars().count()
}

fn set_nested(target: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = target;
    for key in parents {
        let slot = cursor
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        cursor = next;
    }
    cursor.insert(last.clone(), value);
}

fn lists_to_objects(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Object(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), lists_to_objects(item)))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, item)| (key, lists_to_objects(item)))
                .collect(),
        ),
        other => other,
    }
}
