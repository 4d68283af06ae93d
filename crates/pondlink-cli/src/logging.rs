//! Logging initialization.
//!
//! Interactive runs get pretty logs on stderr, keeping stdout clean for scan
//! reports and JSON output. With `--log-file`, JSON logs additionally roll
//! daily under the platform log directory for field debugging of
//! provisioning sessions.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the non-blocking file writer alive for the process lifetime.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging. Filter comes from `RUST_LOG`, falling back to
/// `PONDLINK_LOG_LEVEL`, falling back to `info`.
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed.
pub fn init(log_to_file: bool) -> anyhow::Result<()> {
    let fallback = std::env::var("PONDLINK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&fallback))?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_target(true);

    let file_layer = if log_to_file {
        let log_dir = log_directory();
        std::fs::create_dir_all(&log_dir).ok();
        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "pondlink");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// The log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/pondlink")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "pondlink")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
