//! Request pipelines: plan resolution, ingestion loop and query path.

pub mod builder;
mod service;
pub mod types;

pub use builder::{
    Backends, IngestPlan, LiveBackends, QueryPlan, plan_ingest, plan_query, resolve_search_type,
};
pub use service::{PipelineApi, PipelineService, StagedFile};
pub use types::{FailureClass, IngestOutcome, Match, PipelineError, QueryOutcome};
