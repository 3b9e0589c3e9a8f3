//! Pure request-to-plan resolution plus the seam that materializes live collaborators.
//!
//! `plan_ingest` and `plan_query` touch neither the network nor the filesystem: every name in
//! the request (splitter, embedding provider, search strategy) is resolved against its closed
//! registry here, so a bad request fails before any file is loaded or any remote call is made.

use crate::document::Metadata;
use crate::elastic::{
    ElasticClient, ElasticRetriever, ElasticVectorWriter, Retriever, RetrieverSpec,
    SearchStrategy, StoreSpec, VectorWriter, WriteMode,
};
use crate::embedding::{EmbeddingClient, EmbeddingSpec, build_embedding_client};
use crate::loader::{DocumentLoader, FileLoader, LoaderSpec};
use crate::pipeline::types::PipelineError;
use crate::schema::{EsAuth, QueryCfg, UploadCfg};
use crate::splitter::{TextSplitter, build_splitter};
use reqwest::Client;
use std::sync::Arc;

/// Everything an ingestion request resolved to.
pub struct IngestPlan {
    /// Target index.
    pub index_name: String,
    /// Loader mode and options.
    pub loader: LoaderSpec,
    /// Constructed splitter.
    pub splitter: Box<dyn TextSplitter>,
    /// Embedding provider, model and options.
    pub embedding: EmbeddingSpec,
    /// Connection settings.
    pub elasticsearch: EsAuth,
    /// Index layout and write mode.
    pub store: StoreSpec,
    /// Metadata merged into every loaded document.
    pub metadata: Metadata,
}

/// Everything a query request resolved to.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Query text.
    pub query: String,
    /// Embedding provider, model and options.
    pub embedding: EmbeddingSpec,
    /// Connection settings.
    pub elasticsearch: EsAuth,
    /// Strategy and its parameters.
    pub retriever: RetrieverSpec,
}

/// Map a client-facing search type to a native strategy id.
///
/// Only `keyword` is renamed; unknown strings pass through untouched.
pub fn resolve_search_type(search_type: &str) -> &str {
    match search_type {
        "similarity" => "similarity",
        "mmr" => "mmr",
        "script_score" => "script_score",
        "keyword" => "similarity_score",
        other => other,
    }
}

/// Resolve an upload configuration.
pub fn plan_ingest(cfg: &UploadCfg) -> Result<IngestPlan, PipelineError> {
    let index_name = require_index(&cfg.index_name)?;
    let vector_field = require_vector_field(&cfg.vector_field)?;
    let splitter = build_splitter(&cfg.splitter)?;
    let embedding = EmbeddingSpec::from_cfg(&cfg.embedding)?;
    let loader = LoaderSpec::from_cfg(&cfg.loader).map_err(PipelineError::LoaderConfig)?;
    let store = StoreSpec {
        index_name: index_name.clone(),
        vector_field,
        distance: cfg.distance.unwrap_or_default(),
        write_mode: WriteMode::from_upsert(cfg.upsert),
    };

    tracing::debug!(
        index = %index_name,
        splitter = %cfg.splitter.kind,
        provider = %embedding.provider,
        model = %embedding.model,
        mode = cfg.loader.mode.as_str(),
        write_mode = ?store.write_mode,
        distance = %store.distance,
        "Ingestion planned"
    );

    Ok(IngestPlan {
        index_name,
        loader,
        splitter,
        embedding,
        elasticsearch: cfg.elasticsearch.clone(),
        store,
        metadata: cfg.metadata.clone(),
    })
}

/// Resolve a query configuration.
pub fn plan_query(cfg: &QueryCfg) -> Result<QueryPlan, PipelineError> {
    let index_name = require_index(&cfg.index_name)?;
    let vector_field = require_vector_field(&cfg.vector_field)?;
    let strategy: SearchStrategy = resolve_search_type(&cfg.search_type).parse()?;
    let embedding = EmbeddingSpec::from_cfg(&cfg.embedding)?;
    let retriever = RetrieverSpec::resolve(
        &index_name,
        &vector_field,
        strategy,
        cfg.k,
        cfg.score_threshold,
        cfg.dims,
        &cfg.retriever_kwargs,
    )?;

    tracing::debug!(
        index = %index_name,
        search_type = %cfg.search_type,
        strategy = %strategy,
        k = retriever.k,
        "Query planned"
    );

    Ok(QueryPlan {
        query: cfg.query.clone(),
        embedding,
        elasticsearch: cfg.elasticsearch.clone(),
        retriever,
    })
}

fn require_index(index_name: &str) -> Result<String, PipelineError> {
    let trimmed = index_name.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "index_name must not be empty".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn require_vector_field(vector_field: &str) -> Result<String, PipelineError> {
    let trimmed = vector_field.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "vector_field must not be empty".into(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Factory for the collaborators a plan needs at run time.
pub trait Backends: Send + Sync {
    /// File loader, shared with the blocking pool.
    fn loader(&self) -> Arc<dyn DocumentLoader>;

    /// Embedding client for `spec`.
    fn embedder(&self, spec: &EmbeddingSpec) -> Result<Box<dyn EmbeddingClient>, PipelineError>;

    /// Writer for ingestion; may create the index.
    fn writer(
        &self,
        auth: &EsAuth,
        spec: &StoreSpec,
    ) -> Result<Box<dyn VectorWriter>, PipelineError>;

    /// Read-only retriever for queries.
    fn retriever(
        &self,
        auth: &EsAuth,
        spec: &RetrieverSpec,
        embedder: Box<dyn EmbeddingClient>,
    ) -> Result<Box<dyn Retriever>, PipelineError>;
}

/// Production backends over the shared HTTP connection pool.
#[derive(Clone)]
pub struct LiveBackends {
    http: Client,
}

impl LiveBackends {
    /// Wrap the process-wide HTTP client.
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

impl Backends for LiveBackends {
    fn loader(&self) -> Arc<dyn DocumentLoader> {
        Arc::new(FileLoader)
    }

    fn embedder(&self, spec: &EmbeddingSpec) -> Result<Box<dyn EmbeddingClient>, PipelineError> {
        Ok(build_embedding_client(spec, self.http.clone())?)
    }

    fn writer(
        &self,
        auth: &EsAuth,
        spec: &StoreSpec,
    ) -> Result<Box<dyn VectorWriter>, PipelineError> {
        let client = ElasticClient::connect(self.http.clone(), auth)?;
        Ok(Box::new(ElasticVectorWriter::new(client, spec.clone())))
    }

    fn retriever(
        &self,
        auth: &EsAuth,
        spec: &RetrieverSpec,
        embedder: Box<dyn EmbeddingClient>,
    ) -> Result<Box<dyn Retriever>, PipelineError> {
        let client = ElasticClient::connect(self.http.clone(), auth)?;
        Ok(Box::new(ElasticRetriever::new(client, embedder, spec.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DistanceStrategy;
    use serde_json::json;

    fn upload(overrides: serde_json::Value) -> UploadCfg {
        let mut base = json!({
            "index_name": "docs",
            "embedding": {"model": "text-embedding-3-small"},
            "elasticsearch": {}
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), overrides.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).expect("upload cfg")
    }

    fn query(search_type: &str) -> QueryCfg {
        serde_json::from_value(json!({
            "query": "what is rust",
            "index_name": "docs",
            "search_type": search_type,
            "embedding": {"provider": "ollama", "model": "nomic-embed-text"},
            "elasticsearch": {"hosts": ["http://localhost:9200"]}
        }))
        .expect("query cfg")
    }

    #[test]
    fn aliases_map_to_fixed_distinct_strategies() {
        let aliases = ["similarity", "mmr", "script_score", "keyword"];
        let resolved: Vec<&str> = aliases.iter().map(|alias| resolve_search_type(alias)).collect();
        assert_eq!(
            resolved,
            vec!["similarity", "mmr", "script_score", "similarity_score"]
        );
        assert_eq!(resolve_search_type("hybrid"), "hybrid");
        assert_eq!(
            resolve_search_type("similarity_score_threshold"),
            "similarity_score_threshold"
        );
    }

    #[test]
    fn ingest_plan_applies_defaults() {
        let plan = plan_ingest(&upload(json!({}))).expect("plan");
        assert_eq!(plan.index_name, "docs");
        assert_eq!(plan.store.vector_field, "embedding");
        assert_eq!(plan.store.distance, DistanceStrategy::Cosine);
        assert_eq!(plan.store.write_mode, WriteMode::Upsert);
        assert_eq!(plan.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn null_distance_means_cosine_and_upsert_false_appends() {
        let plan =
            plan_ingest(&upload(json!({"distance": null, "upsert": false}))).expect("plan");
        assert_eq!(plan.store.distance, DistanceStrategy::Cosine);
        assert_eq!(plan.store.write_mode, WriteMode::Append);
    }

    #[test]
    fn unknown_names_fail_planning() {
        let error = plan_ingest(&upload(json!({"splitter": {"type": "Nope"}}))).err();
        assert!(matches!(error, Some(PipelineError::Splitter(_))));

        let error = plan_ingest(&upload(
            json!({"embedding": {"provider": "cohere", "model": "m"}}),
        ))
        .err();
        assert!(matches!(error, Some(PipelineError::Embedding(_))));

        let error = plan_ingest(&upload(json!({"index_name": "  "}))).err();
        assert!(matches!(error, Some(PipelineError::InvalidConfig(_))));

        let loader = json!({"loader": {"kwargs": {"file_type": "docx"}}});
        let error = plan_ingest(&upload(loader)).err();
        assert!(matches!(error, Some(PipelineError::LoaderConfig(_))));
    }

    #[test]
    fn query_plan_resolves_keyword_alias() {
        let plan = plan_query(&query("keyword")).expect("plan");
        assert_eq!(plan.retriever.strategy, SearchStrategy::SimilarityScore);
        assert_eq!(plan.retriever.k, 4);

        let error = plan_query(&query("hybrid")).unwrap_err();
        assert!(error.to_string().contains("Unknown search type 'hybrid'"));
    }

    #[test]
    fn live_backends_validate_connection_settings() {
        let backends = LiveBackends::new(Client::new());
        let plan = plan_ingest(&upload(json!({"elasticsearch": {"hosts": []}}))).expect("plan");
        let error = backends.writer(&plan.elasticsearch, &plan.store).err();
        assert!(matches!(error, Some(PipelineError::Store(_))));
    }
}
