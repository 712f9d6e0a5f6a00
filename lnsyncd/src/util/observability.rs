use std::error::Error;
use std::path::Path;
use std::str::FromStr;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/** create a non blocking tracing file appender writing `<who>.log` in `datadir` */
pub fn setup_file_appender<P: AsRef<Path>>(datadir: P, who: &str) -> (NonBlocking, WorkerGuard) {
    let file_appender = rolling::never(datadir.as_ref(), format!("{}.log", who));

    tracing_appender::non_blocking(file_appender)
}

/** create a RUST_LOG env based log filter with the given default level, info if unparsable */
pub fn env_filter(default_level: &str) -> EnvFilter {
    let level = LevelFilter::from_str(default_level).unwrap_or(LevelFilter::INFO);
    EnvFilter::builder().with_default_directive(level.into()).from_env_lossy()
}

/**
 * Initialize tracing-subscriber with env filter based on RUST_LOG env variable.
 * fmt layer is used to print logs to stdout.
 * fmt layer with custom writer is used to write logs to log file in datadir.
 * Records emitted through the `log` facade are forwarded as well.
*/
pub fn init_tracing_subscriber<P: AsRef<Path>>(
    datadir: P,
    who: &str,
    default_level: &str,
) -> Result<LogGuard, Box<dyn Error>> {
    let (file_writer, file_guard) = setup_file_appender(datadir, who);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .with_target(false)
        .with_source_location(true)
        .compact();

    let stdout_layer = fmt::layer().event_format(format.clone()).with_writer(std::io::stdout);
    let file_layer = fmt::layer().event_format(format.with_ansi(false)).with_writer(file_writer);
    let env_filter = env_filter(default_level);

    let default_subscriber =
        tracing_subscriber::registry().with(stdout_layer).with(file_layer).with(env_filter);

    match default_subscriber.try_init() {
        Ok(_) => Ok(LogGuard::new(file_guard)),
        Err(err) => Err(Box::new(err)),
    }
}

/// Keeps the file appender flushing until dropped
pub struct LogGuard {
    _file_appender_guard: WorkerGuard,
}

impl LogGuard {
    pub fn new(file_appender_guard: WorkerGuard) -> Self {
        Self { _file_appender_guard: file_appender_guard }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::{fmt, layer::SubscriberExt};

    #[test]
    fn test_setup_file_appender() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.log");

        {
            let (file_writer, _file_guard) = setup_file_appender(temp_dir.path(), "test");
            let subscriber = tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(file_writer))
                .with(LevelFilter::INFO);

            tracing::subscriber::with_default(subscriber, || {
                tracing::info!("test random date: 11/08/2001");
                tracing::debug!("filtered out");
            });
            // dropping the guard flushes the writer
        }

        assert!(file_path.exists());
        let contents = std::fs::read_to_string(&file_path).expect("failed to read file");
        assert!(contents.contains("test random date: 11/08/2001"));
        assert!(!contents.contains("filtered out"));
    }
}
