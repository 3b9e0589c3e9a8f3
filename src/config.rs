use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
const DEFAULT_UPLOAD_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Process-level runtime configuration for the uploader server.
///
/// Per-request pipeline settings travel in the request payload (see [`crate::schema`]); this
/// struct only covers how the server itself binds and stages uploads.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interface the HTTP listener binds to.
    pub server_host: String,
    /// Optional fixed port; when absent the first free port in the fallback range is used.
    pub server_port: Option<u16>,
    /// Upper bound on the multipart request body size.
    pub upload_max_bytes: usize,
    /// Directory receiving scratch copies of uploaded files.
    pub scratch_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_host: load_env_optional("SERVER_HOST")
                .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            upload_max_bytes: load_env_optional("UPLOAD_MAX_BYTES")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("UPLOAD_MAX_BYTES".into()))
                })
                .transpose()?
                .unwrap_or(DEFAULT_UPLOAD_MAX_BYTES),
            scratch_dir: load_env_optional("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
        })
    }

    /// Apply command-line overrides on top of the environment-derived values.
    pub fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<u16>,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(host) = host {
            self.server_host = host;
        }
        if port.is_some() {
            self.server_port = port;
        }
        if let Some(dir) = scratch_dir {
            self.scratch_dir = dir;
        }
        self
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Install an already-built configuration in the global cache.
///
/// Returns the configuration that ends up installed, which is the existing one when the cache
/// was populated earlier.
pub fn init_config(config: Config) -> &'static Config {
    tracing::debug!(
        host = %config.server_host,
        server_port = ?config.server_port,
        upload_max_bytes = config.upload_max_bytes,
        scratch_dir = %config.scratch_dir.display(),
        "Loaded configuration"
    );
    CONFIG.get_or_init(|| config)
}
