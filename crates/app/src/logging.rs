use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Single `tracing_subscriber` initialization point for the whole process
/// (§4.F). Library crates (`voxjockey-*`) only ever call `tracing::{info,
/// warn, error, debug}!`; none of them configure a subscriber themselves.
///
/// Writes to stderr and a daily-rotated file under `logs/`. Default level is
/// `info`; override with `RUST_LOG` (e.g. `RUST_LOG=voxjockey_brain=debug`).
pub fn init() -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "voxjockey.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
