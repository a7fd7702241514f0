#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `stripefs_daemon` implements the storage-node side of stripefs: a TCP
//! listener that serves raw chunk files out of a configured root directory.
//! Each accepted connection gets its own worker thread running a
//! [`Session`], a small state machine over the framed protocol from
//! [`stripefs_protocol`].
//!
//! # Design
//!
//! - `config` carries the immutable [`DaemonConfig`] handed to the
//!   runtime.
//! - `session` owns all per-connection state: a private chunk-sized
//!   receive buffer, the currently open write target, and its append
//!   cursor. Nothing is shared across connections, so there are no global
//!   locks.
//! - `paths` normalises client-supplied paths and refuses anything that
//!   would escape the root.
//!
//! # Invariants
//!
//! - A connection's append cursor is monotonic and equals the sum of all
//!   `Write` payloads received since the last `WritePath`.
//! - Protocol violations (oversized paths, writes without an open target)
//!   are logged and skipped; only socket errors end a session.

mod config;
mod error;
mod paths;
mod session;

use std::net::{TcpListener, TcpStream};
use std::thread;

use tracing::{debug, info, warn};

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use session::Session;

/// A bound daemon listener, ready to serve connections.
///
/// Binding is split from serving so callers (and tests) can learn the local
/// address before the accept loop starts.
pub struct Daemon {
    listener: TcpListener,
    config: DaemonConfig,
}

impl Daemon {
    /// Binds the listener and creates the storage root.
    pub fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        std::fs::create_dir_all(config.root()).map_err(|source| DaemonError::CreateRoot {
            path: config.root().to_path_buf(),
            source,
        })?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .map_err(|source| DaemonError::Bind { addr, source })?;

        Ok(Self { listener, config })
    }

    /// Returns the address the listener is bound to.
    ///
    /// Useful when the configured port was 0 and the OS picked one.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, DaemonError> {
        self.listener.local_addr().map_err(|source| DaemonError::Bind {
            addr: self.config.socket_addr(),
            source,
        })
    }

    /// Accepts connections until the process exits, one session thread per
    /// peer. Accept failures are logged and the loop continues.
    pub fn run(self) -> Result<(), DaemonError> {
        info!(
            addr = %self.local_addr()?,
            root = %self.config.root().display(),
            "daemon listening"
        );

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_session(stream),
                Err(error) => warn!(%error, "accept failed"),
            }
        }

        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| String::from("unknown"));
        let root = self.config.root().to_path_buf();

        let builder = thread::Builder::new().name(format!("session-{peer}"));
        let thread_peer = peer.clone();
        let spawned = builder.spawn(move || {
            debug!(peer = %thread_peer, "session started");
            match Session::new(stream, root).run() {
                Ok(()) => debug!(peer = %thread_peer, "session ended"),
                Err(error) => warn!(peer = %thread_peer, %error, "session aborted"),
            }
        });

        if let Err(error) = spawned {
            warn!(%peer, %error, "failed to spawn session thread");
        }
    }
}

/// Binds and serves in one call: the entry point used by the CLI.
pub fn run_daemon(config: DaemonConfig) -> Result<(), DaemonError> {
    Daemon::bind(config)?.run()
}
