//! Tracing subscriber bootstrap.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
const FILTER_ENV: &str = "STRIPEFS_LOG";

/// Initialises the global subscriber.
///
/// The filter comes from `STRIPEFS_LOG` and defaults to `info`. Output goes
/// to stderr, or to `log_file` when one was requested on the command line.
pub(crate) fn init(log_file: Option<&PathBuf>) -> io::Result<()> {
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}
