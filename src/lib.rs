#![deny(missing_docs)]

//! Core library for the configuration-driven RAG uploader.
//!
//! Each request carries a JSON configuration that selects a loader mode, a text splitter, an
//! embedding provider and an Elasticsearch index. The [`pipeline`] module turns that
//! configuration into a plan and executes it; [`api`] exposes it over HTTP.

/// HTTP routing and request handlers.
pub mod api;
/// Environment-driven server configuration.
pub mod config;
/// Document model shared by loaders, splitters and stores.
pub mod document;
/// Elasticsearch vector store integration.
pub mod elastic;
/// Embedding client abstraction and provider adapters.
pub mod embedding;
/// File loaders turning staged uploads into documents.
pub mod loader;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query pipelines.
pub mod pipeline;
/// Request configuration schema.
pub mod schema;
/// Text splitter registry and implementations.
pub mod splitter;
