//! Write side of the vector store: index bootstrap plus embedded bulk writes.

use crate::document::{Document, SOURCE_FILE_KEY};
use crate::elastic::client::ElasticClient;
use crate::elastic::types::{ElasticError, StoreError, WriteSummary};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::schema::DistanceStrategy;
use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

/// Actions per bulk request.
pub const BULK_BATCH_SIZE: usize = 1000;

/// How repeated ingestion of the same content behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `index` actions with content-derived ids; re-ingesting a file overwrites its chunks.
    Upsert,
    /// `create` actions with random ids; every write appends.
    Append,
}

impl WriteMode {
    /// Map the request's `upsert` flag.
    pub fn from_upsert(upsert: bool) -> Self {
        if upsert { Self::Upsert } else { Self::Append }
    }

    fn action(self) -> &'static str {
        match self {
            Self::Upsert => "index",
            Self::Append => "create",
        }
    }
}

/// Target index layout for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSpec {
    /// Index receiving the chunks.
    pub index_name: String,
    /// Name of the `dense_vector` field.
    pub vector_field: String,
    /// Similarity configured when the index is created.
    pub distance: DistanceStrategy,
    /// Idempotency behavior.
    pub write_mode: WriteMode,
}

/// Embeds chunks and persists them.
#[async_trait]
pub trait VectorWriter: Send + Sync {
    /// Embed `chunks` with `embedder` and write them; returns what was stored.
    async fn write(
        &self,
        chunks: &[Document],
        embedder: &dyn EmbeddingClient,
    ) -> Result<WriteSummary, StoreError>;
}

/// [`VectorWriter`] backed by the Elasticsearch bulk API.
pub struct ElasticVectorWriter {
    client: ElasticClient,
    spec: StoreSpec,
    batch_size: usize,
    index_ready: OnceCell<()>,
}

impl ElasticVectorWriter {
    /// Bind a writer to `spec.index_name`.
    pub fn new(client: ElasticClient, spec: StoreSpec) -> Self {
        Self {
            client,
            spec,
            batch_size: BULK_BATCH_SIZE,
            index_ready: OnceCell::new(),
        }
    }

    async fn ensure_index(&self, dims: usize) -> Result<(), ElasticError> {
        self.index_ready
            .get_or_try_init(|| async {
                if self.client.index_exists(&self.spec.index_name).await? {
                    return Ok(());
                }
                tracing::debug!(
                    index = %self.spec.index_name,
                    dims,
                    similarity = self.spec.distance.es_similarity(),
                    "Creating index"
                );
                let mapping = index_mapping(&self.spec.vector_field, dims, self.spec.distance);
                self.client
                    .create_index(&self.spec.index_name, &mapping)
                    .await
            })
            .await
            .map(|_| ())
    }

    fn document_id(&self, ordinal: usize, chunk: &Document) -> String {
        match self.spec.write_mode {
            WriteMode::Upsert => chunk_id(chunk, ordinal),
            WriteMode::Append => uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl VectorWriter for ElasticVectorWriter {
    async fn write(
        &self,
        chunks: &[Document],
        embedder: &dyn EmbeddingClient,
    ) -> Result<WriteSummary, StoreError> {
        if chunks.is_empty() {
            return Ok(WriteSummary::default());
        }

        let texts = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = embedder.generate_embeddings(texts).await?;
        if vectors.len() != chunks.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "received {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            ))
            .into());
        }
        let dims = vectors.first().map_or(0, Vec::len);
        self.ensure_index(dims).await?;

        let mut summary = WriteSummary::default();
        let records: Vec<(usize, (&Document, Vec<f32>))> =
            chunks.iter().zip(vectors).enumerate().collect();

        for batch in records.chunks(self.batch_size) {
            let mut lines = Vec::with_capacity(batch.len() * 2);
            for (ordinal, (chunk, vector)) in batch {
                lines.push(json!({
                    self.spec.write_mode.action(): {
                        "_index": self.spec.index_name,
                        "_id": self.document_id(*ordinal, chunk),
                    }
                }));
                lines.push(json!({
                    "text": chunk.content,
                    "metadata": chunk.metadata,
                    self.spec.vector_field.as_str(): vector,
                }));
            }
            let payload = to_ndjson(&lines);

            let response = self.client.bulk(payload).await?;
            if let Some((failed, reason)) = response.failures() {
                let error = ElasticError::BulkFailure { failed, reason };
                tracing::error!(
                    index = %self.spec.index_name,
                    error = %error,
                    "Bulk write rejected"
                );
                return Err(error.into());
            }
            summary.written += batch.len();
            summary.batches += 1;
        }

        tracing::debug!(
            index = %self.spec.index_name,
            written = summary.written,
            batches = summary.batches,
            mode = ?self.spec.write_mode,
            "Chunks written"
        );
        Ok(summary)
    }
}

/// Mapping for a fresh index holding `text`, `metadata` and the vector field.
pub(crate) fn index_mapping(vector_field: &str, dims: usize, distance: DistanceStrategy) -> Value {
    json!({
        "mappings": {
            "properties": {
                "text": {"type": "text"},
                "metadata": {"type": "object"},
                vector_field: {
                    "type": "dense_vector",
                    "dims": dims,
                    "index": true,
                    "similarity": distance.es_similarity(),
                }
            }
        }
    })
}

/// Deterministic id over the source file, chunk ordinal and content.
pub(crate) fn chunk_id(chunk: &Document, ordinal: usize) -> String {
    let source = chunk
        .metadata
        .get(SOURCE_FILE_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0]);
    hasher.update(ordinal.to_le_bytes());
    hasher.update([0]);
    hasher.update(chunk.content.as_bytes());
    hex::encode(hasher.finalize())
}

fn to_ndjson(lines: &[Value]) -> String {
    let mut payload = String::new();
    for line in lines {
        payload.push_str(&line.to_string());
        payload.push('\n');
    }
    payload
}
