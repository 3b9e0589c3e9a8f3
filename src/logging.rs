//! Tracing configuration and log routing.
//!
//! Every event goes to stdout through a compact formatter and is mirrored to a log file through
//! a non-blocking writer. `RAG_UPLOADER_LOG_FILE` names an explicit file to append to; without
//! it logs land in `logs/rag-uploader.log`, rotated according to `RAG_UPLOADER_LOG_ROTATION`
//! (`never`, `daily` or `hourly`).
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "RAG_UPLOADER_LOG_FILE";
const LOG_ROTATION_ENV: &str = "RAG_UPLOADER_LOG_ROTATION";
const LOG_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "rag-uploader.log";
const DEFAULT_FILTER: &str = "info,hyper_util=warn";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rotation {
    Never,
    Daily,
    Hourly,
}

#[derive(Debug, PartialEq, Eq)]
enum LogTarget {
    /// Append to an explicit file.
    File(PathBuf),
    /// Managed file under the logs directory.
    Managed {
        dir: PathBuf,
        file_name: &'static str,
        rotation: Rotation,
    },
}

/// Install the global subscriber.
///
/// `RUST_LOG` controls filtering and defaults to `info`. The file layer is skipped, with a note
/// on stderr, when its target cannot be opened.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = resolve_target(
        std::env::var(LOG_FILE_ENV).ok(),
        std::env::var(LOG_ROTATION_ENV).ok(),
    );
    match open_writer(&target) {
        Ok(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        Err(err) => {
            eprintln!("File logging disabled ({target:?}): {err}");
            registry.init();
        }
    }
}

fn resolve_target(file: Option<String>, rotation: Option<String>) -> LogTarget {
    if let Some(path) = file.filter(|path| !path.trim().is_empty()) {
        return LogTarget::File(PathBuf::from(path));
    }
    let rotation = match rotation.as_deref().map(str::trim) {
        Some(value) if value.eq_ignore_ascii_case("daily") => Rotation::Daily,
        Some(value) if value.eq_ignore_ascii_case("hourly") => Rotation::Hourly,
        _ => Rotation::Never,
    };
    LogTarget::Managed {
        dir: PathBuf::from(LOG_DIR),
        file_name: LOG_FILE_NAME,
        rotation,
    }
}

/// Open the target and wrap it in a non-blocking writer whose guard lives for the process.
fn open_writer(target: &LogTarget) -> std::io::Result<NonBlocking> {
    let (writer, guard) = match target {
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::Managed {
            dir,
            file_name,
            rotation,
        } => {
            std::fs::create_dir_all(dir)?;
            let appender: RollingFileAppender = match rotation {
                Rotation::Never => rolling::never(dir, file_name),
                Rotation::Daily => rolling::daily(dir, file_name),
                Rotation::Hourly => rolling::hourly(dir, file_name),
            };
            tracing_appender::non_blocking(appender)
        }
    };
    let _ = LOG_GUARD.set(guard);
    Ok(writer)
}
