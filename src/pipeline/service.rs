//! Pipeline service executing ingestion and query plans.

use crate::document::{Document, Metadata, SOURCE_FILE_KEY};
use crate::loader::{DocumentLoader, LoaderSpec};
use crate::pipeline::builder::{Backends, plan_ingest, plan_query};
use crate::pipeline::types::{IngestOutcome, Match, PipelineError, QueryOutcome};
use crate::schema::{QueryCfg, UploadCfg};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// An uploaded file copied to scratch storage.
///
/// The scratch copy is deleted when the value is dropped, whichever way the request ends.
#[derive(Debug)]
pub struct StagedFile {
    /// File name supplied by the client.
    pub filename: String,
    /// Scratch copy on local disk.
    pub scratch: NamedTempFile,
}

impl StagedFile {
    /// Location of the scratch copy.
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }
}

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Load, split, embed and write every staged file into the configured index.
    async fn ingest(
        &self,
        cfg: UploadCfg,
        files: Vec<StagedFile>,
    ) -> Result<IngestOutcome, PipelineError>;

    /// Run one retrieval against an existing index.
    async fn query(&self, cfg: QueryCfg) -> Result<QueryOutcome, PipelineError>;
}

/// Executes plans against the collaborators supplied by `B`.
pub struct PipelineService<B> {
    backends: B,
}

impl<B: Backends> PipelineService<B> {
    /// Build a service on top of `backends`.
    pub fn new(backends: B) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl<B: Backends> PipelineApi for PipelineService<B> {
    async fn ingest(
        &self,
        cfg: UploadCfg,
        files: Vec<StagedFile>,
    ) -> Result<IngestOutcome, PipelineError> {
        let plan = plan_ingest(&cfg)?;
        let embedder = self.backends.embedder(&plan.embedding)?;
        let writer = self.backends.writer(&plan.elasticsearch, &plan.store)?;
        let loader = self.backends.loader();

        tracing::info!(index = %plan.index_name, files = files.len(), "Ingestion started");
        let mut outcome = IngestOutcome {
            index: plan.index_name.clone(),
            uploaded_files: files.len(),
            docs: 0,
            chunks: 0,
        };

        // Each staged file is dropped (and its scratch copy removed) at the end of its iteration;
        // an early return drops the rest.
        for file in files {
            let documents = load_staged(Arc::clone(&loader), &file, &plan.loader).await?;
            let documents = annotate(documents, &plan.metadata, &file.filename);
            let chunks = plan.splitter.split_documents(&documents);
            let summary = writer.write(&chunks, embedder.as_ref()).await?;

            tracing::info!(
                index = %plan.index_name,
                file = %file.filename,
                docs = documents.len(),
                chunks = chunks.len(),
                written = summary.written,
                "File ingested"
            );
            outcome.docs += documents.len();
            outcome.chunks += chunks.len();
        }

        tracing::info!(
            index = %outcome.index,
            uploaded_files = outcome.uploaded_files,
            docs = outcome.docs,
            chunks = outcome.chunks,
            "Ingestion finished"
        );
        Ok(outcome)
    }

    async fn query(&self, cfg: QueryCfg) -> Result<QueryOutcome, PipelineError> {
        let plan = plan_query(&cfg)?;
        let embedder = self.backends.embedder(&plan.embedding)?;
        let retriever =
            self.backends
                .retriever(&plan.elasticsearch, &plan.retriever, embedder)?;

        let documents = retriever.retrieve(&plan.query).await?;
        let matches: Vec<Match> = documents.into_iter().map(Match::from).collect();

        tracing::info!(
            index = %plan.retriever.index_name,
            strategy = %plan.retriever.strategy,
            k = plan.retriever.k,
            matches = matches.len(),
            "Query answered"
        );
        Ok(QueryOutcome {
            query: plan.query,
            matches,
        })
    }
}

async fn load_staged(
    loader: Arc<dyn DocumentLoader>,
    file: &StagedFile,
    spec: &LoaderSpec,
) -> Result<Vec<Document>, PipelineError> {
    let path = file.path().to_path_buf();
    let spec = spec.clone();
    tokio::task::spawn_blocking(move || loader.load(&path, &spec))
        .await?
        .map_err(|source| PipelineError::Loader {
            file: file.filename.clone(),
            source,
        })
}

/// Merge the request metadata into each document, then stamp the originating file name.
fn annotate(mut documents: Vec<Document>, extra: &Metadata, filename: &str) -> Vec<Document> {
    for document in &mut documents {
        document.merge_metadata(extra);
        document
            .metadata
            .insert(SOURCE_FILE_KEY.into(), Value::String(filename.to_string()));
    }
    documents
}
