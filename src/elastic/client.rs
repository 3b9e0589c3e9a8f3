//! HTTP client wrapper for the Elasticsearch REST API.

use crate::elastic::types::{BulkResponse, ElasticError, SearchResponse};
use crate::schema::EsAuth;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Credentials {
    None,
    Basic { username: String, password: String },
    ApiKey(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConnectionOptions {
    request_timeout: Option<f64>,
    headers: BTreeMap<String, String>,
    #[serde(flatten)]
    ignored: Map<String, Value>,
}

/// Lightweight HTTP client for one Elasticsearch deployment.
///
/// Hosts are tried in order; the next host is used only when the connection itself fails.
pub struct ElasticClient {
    pub(crate) http: Client,
    pub(crate) hosts: Vec<String>,
    pub(crate) credentials: Credentials,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
}

impl ElasticClient {
    /// Resolve hosts, credentials and connection options from a request's `elasticsearch` block.
    pub fn connect(http: Client, auth: &EsAuth) -> Result<Self, ElasticError> {
        let hosts = match auth.cloud_id.as_deref().filter(|id| !id.trim().is_empty()) {
            Some(cloud_id) => vec![decode_cloud_id(cloud_id)?],
            None => auth
                .hosts
                .iter()
                .map(|host| normalize_base_url(host).map_err(ElasticError::InvalidUrl))
                .collect::<Result<Vec<_>, _>>()?,
        };
        if hosts.is_empty() {
            return Err(ElasticError::NoHosts);
        }

        let credentials = match (&auth.api_key, &auth.username) {
            (Some(key), _) if !key.is_empty() => Credentials::ApiKey(key.clone()),
            (_, Some(username)) if !username.is_empty() => Credentials::Basic {
                username: username.clone(),
                password: auth.password.clone().unwrap_or_default(),
            },
            _ => Credentials::None,
        };

        let options: ConnectionOptions =
            serde_json::from_value(Value::Object(auth.kwargs.clone()))
                .map_err(|error| ElasticError::InvalidOptions(error.to_string()))?;
        if !options.ignored.is_empty() {
            let keys: Vec<&str> = options.ignored.keys().map(String::as_str).collect();
            tracing::warn!(?keys, "Ignoring unsupported Elasticsearch connection options");
        }
        let timeout = match options.request_timeout {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                Some(Duration::from_secs_f64(seconds))
            }
            Some(seconds) => {
                return Err(ElasticError::InvalidOptions(format!(
                    "request_timeout must be a positive number of seconds, got {seconds}"
                )));
            }
            None => None,
        };
        let headers = build_headers(&options.headers)?;

        tracing::debug!(
            hosts = ?hosts,
            auth = credentials.kind(),
            timeout_secs = ?timeout.map(|value| value.as_secs_f64()),
            "Initialized Elasticsearch HTTP client"
        );

        Ok(Self {
            http,
            hosts,
            credentials,
            headers,
            timeout,
        })
    }

    /// Whether `index` exists.
    pub async fn index_exists(&self, index: &str) -> Result<bool, ElasticError> {
        let response = self.execute(Method::HEAD, index, |request| request).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ElasticError::UnexpectedStatus {
                status,
                body: String::new(),
            }),
        }
    }

    /// Create `index` with the supplied settings and mappings.
    ///
    /// An index created concurrently by another writer counts as success.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<(), ElasticError> {
        let response = self
            .execute(Method::PUT, index, |request| request.json(body))
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                tracing::debug!(index, "Index created concurrently");
                return Ok(());
            }
            let error = ElasticError::UnexpectedStatus {
                status: StatusCode::BAD_REQUEST,
                body,
            };
            tracing::error!(error = %error, "Failed to create index");
            return Err(error);
        }

        self.ensure_success(response, || {
            tracing::info!(index, "Index created");
        })
        .await
    }

    /// Send an NDJSON bulk body and refresh the touched indices.
    pub(crate) async fn bulk(&self, payload: String) -> Result<BulkResponse, ElasticError> {
        let response = self
            .execute(Method::POST, "_bulk", |request| {
                request
                    .query(&[("refresh", "true")])
                    .header(CONTENT_TYPE, "application/x-ndjson")
                    .body(payload.clone())
            })
            .await?;
        self.read_json(response).await
    }

    /// Run a search request against `index`.
    pub(crate) async fn search(
        &self,
        index: &str,
        body: &Value,
    ) -> Result<SearchResponse, ElasticError> {
        let response = self
            .execute(Method::POST, &format!("{index}/_search"), |request| {
                request.json(body)
            })
            .await?;
        self.read_json(response).await
    }

    fn request(&self, method: Method, host: &str, path: &str) -> RequestBuilder {
        let url = format_endpoint(host, path);
        let mut req = self.http.request(method, url).headers(self.headers.clone());
        match &self.credentials {
            Credentials::None => {}
            Credentials::Basic { username, password } => {
                req = req.basic_auth(username, Some(password));
            }
            Credentials::ApiKey(key) => {
                req = req.header("authorization", format!("ApiKey {key}"));
            }
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req
    }

    async fn execute<F>(
        &self,
        method: Method,
        path: &str,
        prepare: F,
    ) -> Result<Response, ElasticError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let mut last_error = None;
        for host in &self.hosts {
            let request = prepare(self.request(method.clone(), host, path));
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_connect() => {
                    tracing::warn!(host = %host, error = %error, "Elasticsearch host unreachable");
                    last_error = Some(error);
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(last_error.map_or(ElasticError::NoHosts, ElasticError::Http))
    }

    async fn ensure_success<F>(&self, response: Response, on_success: F) -> Result<(), ElasticError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = ElasticError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Elasticsearch request failed");
            Err(error)
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T, ElasticError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = ElasticError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Elasticsearch request failed");
            return Err(error);
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|error| ElasticError::MalformedResponse(error.to_string()))
    }
}

impl Credentials {
    fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::ApiKey(_) => "api_key",
        }
    }
}

fn build_headers(raw: &BTreeMap<String, String>) -> Result<HeaderMap, ElasticError> {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| ElasticError::InvalidOptions(format!("header '{name}': {error}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|error| ElasticError::InvalidOptions(format!("header '{name}': {error}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Decode an Elastic Cloud id (`name:base64(host$es_uuid$kibana_uuid)`) into the cluster URL.
pub(crate) fn decode_cloud_id(cloud_id: &str) -> Result<String, ElasticError> {
    let encoded = cloud_id
        .split_once(':')
        .map_or(cloud_id, |(_, encoded)| encoded);
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|error| ElasticError::InvalidCloudId(error.to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|error| ElasticError::InvalidCloudId(error.to_string()))?;

    let mut parts = decoded.split('$');
    let host = parts.next().map(str::trim).unwrap_or_default();
    let es_uuid = parts.next().map(str::trim).unwrap_or_default();
    if host.is_empty() || es_uuid.is_empty() {
        return Err(ElasticError::InvalidCloudId(
            "expected '<host>$<elasticsearch uuid>' after decoding".into(),
        ));
    }

    let (host, port) = match host.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host, None),
    };
    Ok(match port {
        Some(port) if port != "443" => format!("https://{es_uuid}.{host}:{port}"),
        _ => format!("https://{es_uuid}.{host}"),
    })
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url.trim()).map_err(|err| format!("{url}: {err}"))?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::HEAD, Method::PUT, MockServer};
    use serde_json::json;

    fn auth(hosts: Vec<String>) -> EsAuth {
        EsAuth {
            hosts,
            ..EsAuth::default()
        }
    }

    #[test]
    fn cloud_id_decodes_to_cluster_url() {
        let encoded = STANDARD.encode("us-east-1.aws.found.io$abc123$kibana456");
        let url = decode_cloud_id(&format!("my-deployment:{encoded}")).expect("url");
        assert_eq!(url, "https://abc123.us-east-1.aws.found.io");

        let with_port = STANDARD.encode("eu-west-1.aws.found.io:9243$def$ghi");
        assert_eq!(
            decode_cloud_id(&format!("name:{with_port}")).expect("url"),
            "https://def.eu-west-1.aws.found.io:9243"
        );
        assert!(matches!(
            decode_cloud_id("name:not base64!"),
            Err(ElasticError::InvalidCloudId(_))
        ));
    }

    #[test]
    fn credentials_prefer_api_key() {
        let mut config = auth(vec!["http://localhost:9200/".into()]);
        config.username = Some("elastic".into());
        config.password = Some("secret".into());
        let client = ElasticClient::connect(Client::new(), &config).expect("client");
        assert_eq!(client.hosts, vec!["http://localhost:9200".to_string()]);
        assert!(matches!(client.credentials, Credentials::Basic { .. }));

        config.api_key = Some("key".into());
        let client = ElasticClient::connect(Client::new(), &config).expect("client");
        assert_eq!(client.credentials, Credentials::ApiKey("key".into()));
    }

    #[test]
    fn rejects_invalid_hosts_and_options() {
        assert!(matches!(
            ElasticClient::connect(Client::new(), &auth(vec![])),
            Err(ElasticError::NoHosts)
        ));
        assert!(matches!(
            ElasticClient::connect(Client::new(), &auth(vec!["not a url".into()])),
            Err(ElasticError::InvalidUrl(_))
        ));

        let mut config = auth(vec!["http://localhost:9200".into()]);
        config.kwargs = json!({"request_timeout": -1})
            .as_object()
            .cloned()
            .unwrap_or_default();
        assert!(matches!(
            ElasticClient::connect(Client::new(), &config),
            Err(ElasticError::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn index_probe_sends_api_key_and_custom_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(HEAD)
                    .path("/docs")
                    .header("authorization", "ApiKey secret")
                    .header("x-tenant", "acme");
                then.status(404);
            })
            .await;

        let mut config = auth(vec![server.base_url()]);
        config.api_key = Some("secret".into());
        config.kwargs = json!({"headers": {"x-tenant": "acme"}, "request_timeout": 5})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let client = ElasticClient::connect(Client::new(), &config).expect("client");

        assert!(!client.index_exists("docs").await.expect("probe"));
        mock.assert();
    }

    #[tokio::test]
    async fn fails_over_to_next_host_on_connect_error() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/docs");
                then.status(200);
            })
            .await;

        // Port 9 (discard) on localhost is not expected to accept connections.
        let config = auth(vec!["http://127.0.0.1:9".into(), server.base_url()]);
        let client = ElasticClient::connect(Client::new(), &config).expect("client");

        assert!(client.index_exists("docs").await.expect("probe"));
        mock.assert();
    }

    #[tokio::test]
    async fn concurrent_index_creation_is_tolerated() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/docs");
                then.status(400).json_body(json!({
                    "error": {"type": "resource_already_exists_exception"},
                    "status": 400
                }));
            })
            .await;

        let client = ElasticClient::connect(Client::new(), &auth(vec![server.base_url()]))
            .expect("client");
        client
            .create_index("docs", &json!({"mappings": {}}))
            .await
            .expect("already exists is fine");
    }
}
