//! HTTP server entrypoint.
use anyhow::{Context, Result};
use clap::Parser;
use rag_uploader::{api, config, logging, pipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "rag-uploader",
    about = "Configuration-driven document ingestion and retrieval over Elasticsearch"
)]
struct Cli {
    /// Interface to bind (overrides `SERVER_HOST`).
    #[arg(long)]
    host: Option<String>,
    /// Fixed port (overrides `SERVER_PORT`).
    #[arg(long)]
    port: Option<u16>,
    /// Directory for staged uploads (overrides `SCRATCH_DIR`).
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let loaded = config::Config::from_env()
        .context("failed to load configuration from environment")?
        .with_overrides(cli.host, cli.port, cli.scratch_dir);
    let config = config::init_config(loaded);
    std::fs::create_dir_all(&config.scratch_dir).with_context(|| {
        format!(
            "failed to create scratch directory {}",
            config.scratch_dir.display()
        )
    })?;

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let service = pipeline::PipelineService::new(pipeline::LiveBackends::new(http));
    let app = api::create_router(Arc::new(service), config);

    let (listener, port) = bind_listener(config)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://{}:{}", config.server_host, port);
    axum::serve(listener, app)
        .await
        .context("HTTP server terminated unexpectedly")?;
    Ok(())
}

async fn bind_listener(config: &config::Config) -> Result<(TcpListener, u16), std::io::Error> {
    let host = config.server_host.as_str();
    if let Some(port) = config.server_port {
        return TcpListener::bind((host, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8001..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8001-8099",
    ))
}
