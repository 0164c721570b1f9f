//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

pub const LOG_FILE_PREFIX: &str = "gcspy.log";
const MAX_LOG_FILES: usize = 3;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
pub fn init() {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    registry().with(fmt_layer).init();
}

/// like [`init`], and also write logs to a daily rotated file in `dir`
///
/// Keep the returned guard alive; dropping it flushes and stops the writer.
pub fn init_with_file(dir: impl AsRef<Path>) -> WorkerGuard {
    let (file_writer, guard) = rolling_writer(dir.as_ref());

    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());
    let file_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(env_filter());

    registry().with(stderr_layer).with(file_layer).init();
    guard
}

/// Non-blocking writer over a daily rotated file in `dir`, falling back to
/// stderr when the directory cannot be used.
pub fn rolling_writer(dir: &Path) -> (NonBlocking, WorkerGuard) {
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
    {
        Ok(appender) => tracing_appender::non_blocking(appender),
        Err(err) => {
            eprintln!(
                "failed to create rolling log file at {}: {err}; falling back to stderr",
                dir.display()
            );
            tracing_appender::non_blocking(std::io::stderr())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn rolling_writer_creates_a_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut writer, guard) = rolling_writer(dir.path());
        writer.write_all(b"hello\n").expect("write");
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(
            names.iter().any(|n| n.starts_with(LOG_FILE_PREFIX)),
            "no log file in {names:?}"
        );
    }
}
