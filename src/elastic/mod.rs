//! Elasticsearch vector store integration.

pub mod client;
pub mod retriever;
pub mod store;
pub mod types;

pub use client::ElasticClient;
pub use retriever::{ElasticRetriever, Retriever, RetrieverOptions, RetrieverSpec};
pub use store::{BULK_BATCH_SIZE, ElasticVectorWriter, StoreSpec, VectorWriter, WriteMode};
pub use types::{ElasticError, SearchStrategy, StoreError, WriteSummary};
