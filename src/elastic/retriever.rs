//! Read side of the vector store: search strategies over an existing index.
//!
//! The retriever never creates or mutates the index. Each hit becomes a [`Document`] whose
//! metadata carries the hit's `_score` under [`SCORE_KEY`].

use crate::document::{Document, Metadata, SCORE_KEY};
use crate::elastic::client::ElasticClient;
use crate::elastic::types::{Hit, SearchStrategy, StoreError};
use crate::embedding::EmbeddingClient;
use crate::schema::{DistanceStrategy, Options};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_SIMILARITY_FETCH_K: usize = 50;
const DEFAULT_MMR_FETCH_K: usize = 20;
const DEFAULT_LAMBDA_MULT: f64 = 0.5;

/// Runs a query and returns ranked documents.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve documents relevant to `query`.
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>, StoreError>;
}

/// Options accepted in `retriever_kwargs`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrieverOptions {
    /// Overrides the request's `k`.
    pub k: Option<usize>,
    /// Used when the request does not set `score_threshold` itself.
    pub score_threshold: Option<f64>,
    /// Elasticsearch filter clause or list of clauses.
    pub filter: Option<Value>,
    /// Candidate pool size.
    pub fetch_k: Option<usize>,
    /// Relevance/diversity trade-off for `mmr` (1.0 = pure relevance).
    pub lambda_mult: Option<f64>,
    /// Scoring function for `script_score`.
    pub distance: Option<DistanceStrategy>,
}

/// Fully resolved retrieval parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverSpec {
    /// Index to search.
    pub index_name: String,
    /// Name of the `dense_vector` field.
    pub vector_field: String,
    /// Native strategy.
    pub strategy: SearchStrategy,
    /// Number of documents to return.
    pub k: usize,
    /// Minimum score a hit must reach, applied to every strategy.
    pub score_threshold: Option<f64>,
    /// Expected query embedding length.
    pub dims: Option<usize>,
    /// Strategy options.
    pub options: RetrieverOptions,
}

impl RetrieverSpec {
    /// Combine request fields with `retriever_kwargs`.
    ///
    /// `k` from the kwargs overrides the request; a request-level threshold overrides the kwargs.
    pub fn resolve(
        index_name: &str,
        vector_field: &str,
        strategy: SearchStrategy,
        k: usize,
        score_threshold: Option<f64>,
        dims: Option<usize>,
        kwargs: &Options,
    ) -> Result<Self, StoreError> {
        let options: RetrieverOptions = serde_json::from_value(Value::Object(kwargs.clone()))
            .map_err(|error| StoreError::InvalidOptions(error.to_string()))?;

        if let Some(lambda) = options.lambda_mult
            && !(0.0..=1.0).contains(&lambda)
        {
            return Err(StoreError::InvalidOptions(format!(
                "lambda_mult must be between 0 and 1, got {lambda}"
            )));
        }
        if let Some(filter) = &options.filter
            && !(filter.is_object() || filter.is_array())
        {
            return Err(StoreError::InvalidOptions(
                "filter must be an object or a list of objects".into(),
            ));
        }

        let score_threshold = score_threshold.or(options.score_threshold);
        if strategy == SearchStrategy::SimilarityScoreThreshold && score_threshold.is_none() {
            return Err(StoreError::InvalidOptions(
                "similarity_score_threshold requires score_threshold".into(),
            ));
        }

        Ok(Self {
            index_name: index_name.to_string(),
            vector_field: vector_field.to_string(),
            strategy,
            k: options.k.unwrap_or(k),
            score_threshold,
            dims,
            options,
        })
    }

    fn filters(&self) -> Vec<Value> {
        match &self.options.filter {
            Some(Value::Array(clauses)) => clauses.clone(),
            Some(clause @ Value::Object(_)) => vec![clause.clone()],
            _ => Vec::new(),
        }
    }

    fn fetch_k(&self, default: usize) -> usize {
        self.options.fetch_k.unwrap_or(default).max(self.k)
    }

    /// Search body for this strategy; `vector` is `None` only for keyword search.
    pub(crate) fn search_body(&self, query: &str, vector: Option<&[f32]>) -> Value {
        let field = self.vector_field.as_str();
        let source = json!({"excludes": [field]});
        match (self.strategy, vector) {
            (SearchStrategy::SimilarityScore, _) | (_, None) => json!({
                "size": self.k,
                "query": {
                    "bool": {
                        "must": [{"match": {"text": {"query": query}}}],
                        "filter": self.filters(),
                    }
                },
                "_source": source,
            }),
            (
                SearchStrategy::Similarity | SearchStrategy::SimilarityScoreThreshold,
                Some(vector),
            ) => {
                let candidates = self.fetch_k(DEFAULT_SIMILARITY_FETCH_K);
                json!({
                    "size": self.k,
                    "knn": {
                        "field": field,
                        "query_vector": vector,
                        "k": self.k,
                        "num_candidates": candidates,
                        "filter": self.filters(),
                    },
                    "_source": source,
                })
            }
            (SearchStrategy::Mmr, Some(vector)) => {
                let candidates = self.fetch_k(DEFAULT_MMR_FETCH_K);
                json!({
                    "size": candidates,
                    "knn": {
                        "field": field,
                        "query_vector": vector,
                        "k": candidates,
                        "num_candidates": candidates,
                        "filter": self.filters(),
                    },
                })
            }
            (SearchStrategy::ScriptScore, Some(vector)) => {
                let mut filter = vec![json!({"exists": {"field": field}})];
                filter.extend(self.filters());
                json!({
                    "size": self.k,
                    "query": {
                        "script_score": {
                            "query": {"bool": {"filter": filter}},
                            "script": {
                                "source": script_source(
                                    self.options.distance.unwrap_or_default(),
                                    field,
                                ),
                                "params": {"query_vector": vector},
                            }
                        }
                    },
                    "_source": source,
                })
            }
        }
    }
}

/// [`Retriever`] over an Elasticsearch index.
pub struct ElasticRetriever {
    client: ElasticClient,
    embedder: Box<dyn EmbeddingClient>,
    spec: RetrieverSpec,
}

impl ElasticRetriever {
    /// Bind a read-only retriever to `spec.index_name`.
    pub fn new(
        client: ElasticClient,
        embedder: Box<dyn EmbeddingClient>,
        spec: RetrieverSpec,
    ) -> Self {
        Self {
            client,
            embedder,
            spec,
        }
    }

    async fn query_vector(&self, query: &str) -> Result<Option<Vec<f32>>, StoreError> {
        if !self.spec.strategy.needs_embedding() {
            return Ok(None);
        }
        let vector = self.embedder.embed_query(query).await?;
        if let Some(expected) = self.spec.dims
            && vector.len() != expected
        {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(Some(vector))
    }
}

#[async_trait]
impl Retriever for ElasticRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>, StoreError> {
        let vector = self.query_vector(query).await?;
        let body = self.spec.search_body(query, vector.as_deref());
        let response = self.client.search(&self.spec.index_name, &body).await?;
        let mut hits = response.hits.hits;

        if let (SearchStrategy::Mmr, Some(query_vector)) = (self.spec.strategy, &vector) {
            let lambda = self.spec.options.lambda_mult.unwrap_or(DEFAULT_LAMBDA_MULT);
            let candidates: Vec<Vec<f32>> = hits
                .iter()
                .map(|hit| hit_vector(hit, &self.spec.vector_field))
                .collect();
            let order = maximal_marginal_relevance(query_vector, &candidates, lambda, self.spec.k);
            let mut slots: Vec<Option<Hit>> = hits.into_iter().map(Some).collect();
            hits = order
                .into_iter()
                .filter_map(|index| slots.get_mut(index).and_then(Option::take))
                .collect();
        }

        let fetched = hits.len();
        let documents: Vec<Document> = hits
            .into_iter()
            .filter(|hit| match self.spec.score_threshold {
                Some(threshold) => hit.score.is_some_and(|score| score >= threshold),
                None => true,
            })
            .map(|hit| hit_to_document(hit, &self.spec.vector_field))
            .collect();

        tracing::debug!(
            index = %self.spec.index_name,
            strategy = %self.spec.strategy,
            k = self.spec.k,
            fetched,
            returned = documents.len(),
            "Retrieval finished"
        );
        Ok(documents)
    }
}

fn script_source(distance: DistanceStrategy, field: &str) -> String {
    match distance {
        DistanceStrategy::Cosine => {
            format!("cosineSimilarity(params.query_vector, '{field}') + 1.0")
        }
        DistanceStrategy::EuclideanDistance => {
            format!("1 / (1 + l2norm(params.query_vector, '{field}'))")
        }
        DistanceStrategy::DotProduct | DistanceStrategy::MaxInnerProduct => format!(
            "double value = dotProduct(params.query_vector, '{field}'); return sigmoid(1, Math.E, -value);"
        ),
    }
}

fn hit_vector(hit: &Hit, field: &str) -> Vec<f32> {
    hit.source
        .get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default()
}

fn hit_to_document(hit: Hit, vector_field: &str) -> Document {
    let mut source = hit.source;
    source.remove(vector_field);
    let content = match source.remove("text") {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };
    let mut metadata = match source.remove("metadata") {
        Some(Value::Object(metadata)) => metadata,
        _ => Metadata::new(),
    };
    if let Some(score) = hit.score {
        metadata.insert(SCORE_KEY.into(), json!(score));
    }
    Document::new(content, metadata)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Greedy MMR selection; returns candidate indices in selection order.
pub(crate) fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    lambda: f64,
    k: usize,
) -> Vec<usize> {
    let lambda = lambda as f32;
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine(query, candidate))
        .collect();
    let mut selected: Vec<usize> = Vec::new();

    while selected.len() < k.min(candidates.len()) {
        let best = (0..candidates.len())
            .filter(|index| !selected.contains(index))
            .map(|index| {
                let redundancy = selected
                    .iter()
                    .map(|chosen| cosine(&candidates[index], &candidates[*chosen]))
                    .fold(f32::NEG_INFINITY, f32::max);
                let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
                (index, lambda * relevance[index] - (1.0 - lambda) * redundancy)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        match best {
            Some((index, _)) => selected.push(index),
            None => break,
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClientError;
    use crate::schema::EsAuth;
    use httpmock::{Method::POST, MockServer};
    use reqwest::Client;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn spec(strategy: SearchStrategy, kwargs: Value) -> RetrieverSpec {
        RetrieverSpec::resolve(
            "docs",
            "embedding",
            strategy,
            4,
            None,
            None,
            kwargs.as_object().expect("object"),
        )
        .expect("spec")
    }

    fn retriever(server: &MockServer, spec: RetrieverSpec, vector: Vec<f32>) -> ElasticRetriever {
        let auth = EsAuth {
            hosts: vec![server.base_url()],
            ..EsAuth::default()
        };
        ElasticRetriever::new(
            ElasticClient::connect(Client::new(), &auth).expect("client"),
            Box::new(FixedEmbedder(vector)),
            spec,
        )
    }

    #[test]
    fn kwargs_override_k_and_reject_unknown_keys() {
        let resolved = spec(SearchStrategy::Similarity, json!({"k": 2, "fetch_k": 10}));
        assert_eq!(resolved.k, 2);
        assert_eq!(resolved.fetch_k(DEFAULT_SIMILARITY_FETCH_K), 10);

        let error = RetrieverSpec::resolve(
            "docs",
            "embedding",
            SearchStrategy::Similarity,
            4,
            None,
            None,
            json!({"top_n": 3}).as_object().expect("object"),
        )
        .unwrap_err();
        assert!(matches!(error, StoreError::InvalidOptions(_)));
    }

    #[test]
    fn threshold_strategy_requires_a_threshold() {
        let error = RetrieverSpec::resolve(
            "docs",
            "embedding",
            SearchStrategy::SimilarityScoreThreshold,
            4,
            None,
            None,
            &Options::new(),
        )
        .unwrap_err();
        assert!(error.to_string().contains("score_threshold"));
    }

    #[test]
    fn keyword_body_has_no_vector() {
        let kwargs = json!({"filter": {"term": {"metadata.project": "demo"}}});
        let body = spec(SearchStrategy::SimilarityScore, kwargs).search_body("rust", None);
        assert_eq!(body["query"]["bool"]["must"][0]["match"]["text"]["query"], "rust");
        assert_eq!(body["query"]["bool"]["filter"][0]["term"]["metadata.project"], "demo");
        assert!(body.get("knn").is_none());
    }

    #[test]
    fn script_score_uses_configured_distance() {
        let body = spec(SearchStrategy::ScriptScore, json!({"distance": "EUCLIDEAN_DISTANCE"}))
            .search_body("q", Some(&[1.0, 0.0]));
        let script = &body["query"]["script_score"]["script"]["source"];
        assert_eq!(script, "1 / (1 + l2norm(params.query_vector, 'embedding'))");
        assert_eq!(
            body["query"]["script_score"]["query"]["bool"]["filter"][0]["exists"]["field"],
            "embedding"
        );
    }

    #[test]
    fn mmr_prefers_diverse_candidates() {
        let query = [1.0, 0.0];
        let candidates = vec![vec![0.9, 0.1], vec![0.9, 0.11], vec![0.9, -0.3]];
        assert_eq!(maximal_marginal_relevance(&query, &candidates, 0.5, 2), vec![0, 2]);
        assert_eq!(maximal_marginal_relevance(&query, &candidates, 1.0, 2), vec![0, 1]);
        assert!(maximal_marginal_relevance(&query, &[], 0.5, 3).is_empty());
    }

    #[tokio::test]
    async fn similarity_search_maps_hits_to_documents() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/docs/_search")
                    .json_body_partial(r#"{"knn": {"field": "embedding", "k": 4, "num_candidates": 50}}"#);
                then.status(200).json_body(json!({
                    "hits": {"hits": [
                        {"_id": "1", "_score": 0.9, "_source": {"text": "first", "metadata": {"source_file": "a.txt"}}},
                        {"_id": "2", "_score": null, "_source": {"text": "second"}}
                    ]}
                }));
            })
            .await;

        let resolved = spec(SearchStrategy::Similarity, json!({}));
        let documents = retriever(&server, resolved, vec![0.1, 0.2])
            .retrieve("what")
            .await
            .expect("documents");

        mock.assert();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].content, "first");
        assert_eq!(documents[0].metadata[SCORE_KEY], 0.9);
        assert_eq!(documents[0].metadata["source_file"], "a.txt");
        assert!(documents[1].metadata.get(SCORE_KEY).is_none());
    }

    #[tokio::test]
    async fn threshold_drops_low_scores() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/docs/_search");
                then.status(200).json_body(json!({
                    "hits": {"hits": [
                        {"_score": 0.9, "_source": {"text": "keep"}},
                        {"_score": 0.2, "_source": {"text": "drop"}}
                    ]}
                }));
            })
            .await;

        let resolved = RetrieverSpec::resolve(
            "docs",
            "embedding",
            SearchStrategy::SimilarityScoreThreshold,
            4,
            Some(0.5),
            None,
            &Options::new(),
        )
        .expect("spec");
        let documents = retriever(&server, resolved, vec![1.0])
            .retrieve("q")
            .await
            .expect("documents");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "keep");
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_before_searching() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/docs/_search");
                then.status(200).json_body(json!({"hits": {"hits": []}}));
            })
            .await;

        let mut resolved = spec(SearchStrategy::Similarity, json!({}));
        resolved.dims = Some(3);
        let error = retriever(&server, resolved, vec![1.0, 2.0])
            .retrieve("q")
            .await
            .expect_err("mismatch");

        assert!(matches!(
            error,
            StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        search.assert_hits(0);
    }

    #[tokio::test]
    async fn mmr_reranks_fetched_candidates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/docs/_search");
                then.status(200).json_body(json!({
                    "hits": {"hits": [
                        {"_score": 0.99, "_source": {"text": "a", "embedding": [0.9, 0.1]}},
                        {"_score": 0.98, "_source": {"text": "a-copy", "embedding": [0.9, 0.11]}},
                        {"_score": 0.80, "_source": {"text": "b", "embedding": [0.9, -0.3]}}
                    ]}
                }));
            })
            .await;

        let resolved = spec(SearchStrategy::Mmr, json!({"k": 2}));
        let documents = retriever(&server, resolved, vec![1.0, 0.0])
            .retrieve("q")
            .await
            .expect("documents");
        let contents: Vec<&str> = documents.iter().map(|doc| doc.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(documents.iter().all(|doc| !doc.metadata.contains_key("embedding")));
    }
}
