//! HTTP surface for the uploader.
//!
//! The router exposes three endpoints:
//!
//! - `GET /health` – Liveness probe answering `{"status": "ok"}`.
//! - `POST /upload` – Multipart form with one or more `files` parts and a JSON `config` part.
//!   Every file is staged to scratch storage, then loaded, split, embedded and written to the
//!   configured index. Returns `{index, uploaded_files, docs, chunks}`.
//! - `POST /query` – Form field `config` (multipart or urlencoded) holding a query
//!   configuration. Returns `{query, matches: [{content, score, metadata}]}`.
//!
//! Every failure answers `{"error": "..."}`. Configuration problems map to 400, extraction
//! failures to 422, embedding or Elasticsearch failures to 502 and local failures to 500.

use crate::config::Config;
use crate::pipeline::{
    FailureClass, IngestOutcome, PipelineApi, PipelineError, QueryOutcome, StagedFile,
};
use crate::schema::{QueryCfg, SchemaError, UploadCfg};
use axum::{
    Form, Json, Router,
    extract::{
        DefaultBodyLimit, FromRequest, Multipart, Request, State,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const FILES_FIELD: &str = "files";
const CONFIG_FIELD: &str = "config";
const UNNAMED_UPLOAD: &str = "upload";

/// Shared handler state.
struct ApiState<S> {
    service: Arc<S>,
    scratch_dir: Arc<PathBuf>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            scratch_dir: Arc::clone(&self.scratch_dir),
        }
    }
}

/// Build the HTTP router over `service`.
///
/// Uploads are staged under `config.scratch_dir` and request bodies are capped at
/// `config.upload_max_bytes`.
pub fn create_router<S>(service: Arc<S>, config: &Config) -> Router
where
    S: PipelineApi + 'static,
{
    let state = ApiState {
        service,
        scratch_dir: Arc::new(config.scratch_dir.clone()),
    };
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload::<S>))
        .route("/query", post(query::<S>))
        .layer(DefaultBodyLimit::max(config.upload_max_bytes))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Stage every uploaded file, then run the ingestion pipeline over them.
///
/// Staged files are owned by this handler until they are handed to the service, so a rejected
/// request removes its scratch copies on the way out.
async fn upload<S>(
    State(state): State<ApiState<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestOutcome>, ApiError>
where
    S: PipelineApi,
{
    let mut multipart = multipart.map_err(ApiError::rejected)?;
    let mut staged = Vec::new();
    let mut raw_config = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILES_FIELD) => staged.push(stage(&state.scratch_dir, field).await?),
            Some(CONFIG_FIELD) => raw_config = Some(field.text().await?),
            other => tracing::debug!(field = ?other, "Ignoring unexpected form field"),
        }
    }

    let cfg = parse_config(raw_config, UploadCfg::from_json)?;
    if staged.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "at least one '{FILES_FIELD}' part is required"
        )));
    }

    tracing::info!(index = %cfg.index_name, files = staged.len(), "Upload received");
    let outcome = state.service.ingest(cfg, staged).await?;
    Ok(Json(outcome))
}

/// Run one retrieval described by the `config` form field.
async fn query<S>(
    State(state): State<ApiState<S>>,
    request: Request,
) -> Result<Json<QueryOutcome>, ApiError>
where
    S: PipelineApi,
{
    let raw_config = read_config_field(request).await?;
    let cfg = parse_config(raw_config, QueryCfg::from_json)?;

    tracing::info!(index = %cfg.index_name, search_type = %cfg.search_type, "Query received");
    let outcome = state.service.query(cfg).await?;
    Ok(Json(outcome))
}

/// Copy one `files` part into a scratch file that keeps the upload's extension.
async fn stage(scratch_dir: &Path, mut field: Field<'_>) -> Result<StagedFile, ApiError> {
    let filename = field
        .file_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(UNNAMED_UPLOAD)
        .to_string();
    let suffix = Path::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let scratch = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(scratch_dir)
        .map_err(ApiError::Staging)?;
    let mut sink = tokio::fs::File::from_std(scratch.reopen().map_err(ApiError::Staging)?);
    let mut bytes = 0usize;
    while let Some(chunk) = field.chunk().await? {
        bytes += chunk.len();
        sink.write_all(&chunk).await.map_err(ApiError::Staging)?;
    }
    sink.flush().await.map_err(ApiError::Staging)?;

    tracing::debug!(file = %filename, bytes, scratch = %scratch.path().display(), "Upload staged");
    Ok(StagedFile { filename, scratch })
}

#[derive(Deserialize)]
struct ConfigForm {
    config: Option<String>,
}

async fn read_config_field(request: Request) -> Result<Option<String>, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(ApiError::rejected)?;
        while let Some(field) = multipart.next_field().await? {
            if field.name() == Some(CONFIG_FIELD) {
                return Ok(Some(field.text().await?));
            }
        }
        return Ok(None);
    }

    let Form(form) = Form::<ConfigForm>::from_request(request, &())
        .await
        .map_err(|rejection| ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        })?;
    Ok(form.config)
}

fn parse_config<T>(
    raw: Option<String>,
    parse: fn(&str) -> Result<T, SchemaError>,
) -> Result<T, ApiError> {
    let raw = raw.ok_or_else(|| {
        ApiError::BadConfig(format!("missing '{CONFIG_FIELD}' form field"))
    })?;
    parse(&raw).map_err(|error| ApiError::BadConfig(error.to_string()))
}

/// Failures surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The `config` field is absent or does not match the schema.
    #[error("Bad config: {0}")]
    BadConfig(String),
    /// The form is structurally incomplete.
    #[error("{0}")]
    BadRequest(String),
    /// The request body could not be read as a form.
    #[error("{message}")]
    Rejected {
        /// Status chosen by the extractor.
        status: StatusCode,
        /// Extractor message.
        message: String,
    },
    /// Scratch storage failed.
    #[error("Failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),
    /// The pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    fn rejected(rejection: MultipartRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }

    /// Status code answered for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadConfig(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Rejected { status, .. } => *status,
            Self::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Pipeline(error) => match error.class() {
                FailureClass::Config => StatusCode::BAD_REQUEST,
                FailureClass::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
                FailureClass::Upstream => StatusCode::BAD_GATEWAY,
                FailureClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        Self::Rejected {
            status: error.status(),
            message: error.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %message, "Request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::config::Config;
    use crate::loader::LoaderError;
    use crate::pipeline::{
        IngestOutcome, Match, PipelineApi, PipelineError, QueryOutcome, StagedFile,
    };
    use crate::schema::{QueryCfg, UploadCfg};
    use crate::splitter::SplitterError;
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    const BOUNDARY: &str = "rag-uploader-test-boundary";

    #[derive(Clone, Debug)]
    struct StagedView {
        filename: String,
        path: PathBuf,
        contents: String,
    }

    #[derive(Default)]
    struct StubPipeline {
        uploads: Mutex<Vec<(String, Vec<StagedView>)>>,
        queries: Mutex<Vec<QueryCfg>>,
        fail_with: Option<fn() -> PipelineError>,
    }

    impl StubPipeline {
        fn failing(fail_with: fn() -> PipelineError) -> Self {
            Self {
                fail_with: Some(fail_with),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PipelineApi for StubPipeline {
        async fn ingest(
            &self,
            cfg: UploadCfg,
            files: Vec<StagedFile>,
        ) -> Result<IngestOutcome, PipelineError> {
            if let Some(fail_with) = self.fail_with {
                return Err(fail_with());
            }
            let views = files
                .iter()
                .map(|file| StagedView {
                    filename: file.filename.clone(),
                    path: file.path().to_path_buf(),
                    contents: std::fs::read_to_string(file.path()).expect("staged contents"),
                })
                .collect::<Vec<_>>();
            let count = views.len();
            self.uploads.lock().await.push((cfg.index_name.clone(), views));
            Ok(IngestOutcome {
                index: cfg.index_name,
                uploaded_files: count,
                docs: count,
                chunks: count * 2,
            })
        }

        async fn query(&self, cfg: QueryCfg) -> Result<QueryOutcome, PipelineError> {
            if let Some(fail_with) = self.fail_with {
                return Err(fail_with());
            }
            let query = cfg.query.clone();
            self.queries.lock().await.push(cfg);
            Ok(QueryOutcome {
                query,
                matches: vec![Match {
                    content: "alpha".into(),
                    score: Some(0.9),
                    metadata: serde_json::Map::new(),
                }],
            })
        }
    }

    fn test_config(upload_max_bytes: usize) -> Config {
        Config {
            server_host: "127.0.0.1".into(),
            server_port: None,
            upload_max_bytes,
            scratch_dir: std::env::temp_dir(),
        }
    }

    fn router(stub: Arc<StubPipeline>) -> Router {
        create_router(stub, &test_config(1024 * 1024))
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a str),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match part {
                Part::Text(name, value) => {
                    body.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                    ));
                }
                Part::File(name, filename, contents) => {
                    body.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                    ));
                    body.push_str("Content-Type: text/plain\r\n\r\n");
                    body.push_str(contents);
                    body.push_str("\r\n");
                }
            }
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body.into_bytes()
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .expect("request")
    }

    fn urlencode(value: &str) -> String {
        value
            .bytes()
            .map(|byte| match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (byte as char).to_string()
                }
                other => format!("%{other:02X}"),
            })
            .collect()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn upload_config() -> String {
        json!({
            "index_name": "docs",
            "embedding": {"model": "text-embedding-3-small"},
            "elasticsearch": {"hosts": ["http://localhost:9200"]},
            "metadata": {"project": "demo"}
        })
        .to_string()
    }

    fn query_config() -> String {
        json!({
            "query": "what is alpha",
            "index_name": "docs",
            "k": 2,
            "embedding": {"model": "text-embedding-3-small"},
            "elasticsearch": {}
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(router(Arc::default()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn upload_stages_files_and_forwards_config() {
        let stub = Arc::new(StubPipeline::default());
        let config = upload_config();
        let request = multipart_request(
            "/upload",
            &[
                Part::File("files", "notes.md", "# Title\nbody"),
                Part::File("files", "plain.txt", "second file"),
                Part::Text("config", &config),
            ],
        );

        let (status, body) = send(router(stub.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"index": "docs", "uploaded_files": 2, "docs": 2, "chunks": 4})
        );
        let uploads = stub.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        let (index, views) = &uploads[0];
        assert_eq!(index, "docs");
        assert_eq!(views[0].filename, "notes.md");
        assert_eq!(views[0].contents, "# Title\nbody");
        assert_eq!(
            views[0].path.extension().and_then(|ext| ext.to_str()),
            Some("md")
        );
        assert_eq!(views[1].filename, "plain.txt");
        for view in views.iter() {
            assert!(!view.path.exists(), "scratch copy must be removed");
        }
    }

    #[tokio::test]
    async fn malformed_upload_config_is_rejected_without_ingesting() {
        let stub = Arc::new(StubPipeline::default());
        let request = multipart_request(
            "/upload",
            &[
                Part::File("files", "notes.txt", "text"),
                Part::Text("config", "{\"embedding\": {\"model\": \"m\"}}"),
            ],
        );

        let (status, body) = send(router(stub.clone()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["error"].as_str().expect("error message");
        assert!(message.starts_with("Bad config: "));
        assert!(message.len() > "Bad config: ".len());
        assert!(stub.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn upload_requires_config_and_files() {
        let stub = Arc::new(StubPipeline::default());
        let request = multipart_request("/upload", &[Part::File("files", "a.txt", "text")]);
        let (status, body) = send(router(stub.clone()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("config"));

        let config = upload_config();
        let request = multipart_request("/upload", &[Part::Text("config", &config)]);
        let (status, body) = send(router(stub.clone()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("files"));
        assert!(stub.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let stub = Arc::new(StubPipeline::default());
        let app = create_router(stub.clone(), &test_config(64));
        let big = "x".repeat(4096);
        let config = upload_config();
        let request = multipart_request(
            "/upload",
            &[Part::Text("config", &config), Part::File("files", "big.txt", &big)],
        );

        let (status, body) = send(app, request).await;

        assert!(status.is_client_error(), "unexpected status {status}");
        assert!(body["error"].is_string());
        assert!(stub.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn query_accepts_urlencoded_config() {
        let stub = Arc::new(StubPipeline::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/query")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("config={}", urlencode(&query_config()))))
            .expect("request");

        let (status, body) = send(router(stub.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "what is alpha");
        assert_eq!(body["matches"][0]["content"], "alpha");
        assert_eq!(body["matches"][0]["score"], 0.9);
        let queries = stub.queries.lock().await;
        assert_eq!(queries[0].k, 2);
        assert_eq!(queries[0].search_type, "similarity");
    }

    #[tokio::test]
    async fn query_accepts_multipart_config() {
        let stub = Arc::new(StubPipeline::default());
        let config = query_config();
        let request = multipart_request("/query", &[Part::Text("config", &config)]);

        let (status, body) = send(router(stub.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matches"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn malformed_query_config_is_rejected() {
        let stub = Arc::new(StubPipeline::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/query")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("config={}", urlencode("{\"query\": 3"))))
            .expect("request");

        let (status, body) = send(router(stub.clone()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .expect("error")
                .starts_with("Bad config: ")
        );
        assert!(stub.queries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pipeline_failures_map_to_status_classes() {
        fn unknown_splitter() -> PipelineError {
            PipelineError::from(SplitterError::Unknown {
                name: "Mystery".into(),
                valid: "RecursiveCharacterTextSplitter".into(),
            })
        }
        fn broken_pdf() -> PipelineError {
            PipelineError::Loader {
                file: "a.pdf".into(),
                source: LoaderError::Pdf("bad xref".into()),
            }
        }
        fn upstream() -> PipelineError {
            PipelineError::from(crate::embedding::EmbeddingClientError::ProviderUnavailable(
                "connection refused".into(),
            ))
        }

        let cases: [(fn() -> PipelineError, StatusCode); 3] = [
            (unknown_splitter, StatusCode::BAD_REQUEST),
            (broken_pdf, StatusCode::UNPROCESSABLE_ENTITY),
            (upstream, StatusCode::BAD_GATEWAY),
        ];
        let config = upload_config();
        for (fail_with, expected) in cases {
            let stub = Arc::new(StubPipeline::failing(fail_with));
            let request = multipart_request(
                "/upload",
                &[
                    Part::File("files", "a.pdf", "%PDF"),
                    Part::Text("config", &config),
                ],
            );
            let (status, body) = send(router(stub), request).await;
            assert_eq!(status, expected);
            assert!(!body["error"].as_str().expect("error").is_empty());
        }
    }
}
