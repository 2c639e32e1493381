use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: stdout always, plus an append-only log file when configured.
///
/// Filter comes from RUST_LOG (default `info`). The returned guard flushes the
/// file writer on drop; keep it alive until the process exits.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(name.to_string_lossy())
                .build(dir)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking_file);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

/// The appender takes a directory and a file name; a bare name lands in `./`.
fn split_log_path(path: &Path) -> anyhow::Result<(&Path, &std::ffi::OsStr)> {
    let name = path
        .file_name()
        .with_context(|| format!("log file path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok((dir, name))
}
