//! Daemon error reporting.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent the daemon from starting.
///
/// Per-session I/O failures never surface here; they end the affected
/// session and are logged by the listener loop.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The storage root could not be created.
    #[error("failed to create storage root {path}: {source}")]
    CreateRoot {
        /// The configured root directory.
        path: PathBuf,
        /// The underlying filesystem error.
        source: io::Error,
    },
    /// Binding the listener socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested bind address.
        addr: SocketAddr,
        /// The underlying socket error.
        source: io::Error,
    },
}
