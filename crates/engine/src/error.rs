//! Common error types for the engine crate.

use std::io;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the striping engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The initial connection to a configured node failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The configured `host:port` address.
        addr: String,
        /// The underlying socket error.
        source: io::Error,
    },
    /// Too many nodes are down to continue: two or more in a parity
    /// cluster, or the lone node of a single-node cluster.
    #[error("too many storage nodes are down")]
    DataLoss,
    /// A read was issued with no file open.
    #[error("no file is open for reading")]
    NotOpen,
    /// A node's stream failed while a chunk was being received.
    #[error("node {node} stream failed mid-read")]
    NodeStream {
        /// Index of the failed node.
        node: usize,
    },
    /// The requested range lies behind what the node streams have already
    /// consumed; within one open, stripes can only be visited forward.
    #[error("read at offset {offset} is behind the streamed position")]
    NonSequentialRead {
        /// File-space offset of the chunk that could not be served.
        offset: u64,
    },
    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
