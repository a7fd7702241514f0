#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `stripefs_cli` is the frontend behind the `stripefs` binary. One
//! executable serves both roles: a storage-node daemon by default, or the
//! FUSE mount client with `--client`.
//!
//! # Design
//!
//! - `options` parses the command line into a typed [`Mode`]
//!   (`clap` builder API); missing required flags surface as argument
//!   errors that print usage and exit with status 1.
//! - `logging` initialises the `tracing` subscriber, filtered through the
//!   `STRIPEFS_LOG` environment variable and writing to stderr or the
//!   `--log` file.
//! - [`run`] dispatches to the daemon listener or to connect-and-mount.

mod logging;
mod options;

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use stripefs_daemon::{DaemonConfig, run_daemon};
use stripefs_engine::Cluster;
use tracing::error;

pub use options::{ClientOptions, Mode, ServerOptions, parse};

/// Parses `args`, boots logging, and runs the selected mode.
///
/// Returns 0 on clean shutdown and 1 on argument, bind, or initial
/// connection failures.
pub fn run<I, S>(args: I) -> ExitCode
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    let mode = match parse(args) {
        Ok(mode) => mode,
        Err(error) => {
            // Help and version requests are not failures.
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(error) = logging::init(mode.log_file()) {
        eprintln!("stripefs: failed to open log file: {error}");
        return ExitCode::FAILURE;
    }

    match mode {
        Mode::Server(options) => {
            let config = DaemonConfig::new(options.port, options.root);
            match run_daemon(config) {
                Ok(()) => ExitCode::SUCCESS,
                Err(daemon_error) => {
                    error!(%daemon_error, "daemon failed");
                    ExitCode::FAILURE
                }
            }
        }
        Mode::Client(options) => {
            let cluster = match Cluster::connect(&options.servers) {
                Ok(cluster) => Arc::new(cluster),
                Err(connect_error) => {
                    error!(%connect_error, "could not reach the storage cluster");
                    return ExitCode::FAILURE;
                }
            };

            match stripefs_mount::mount(
                cluster,
                options.root,
                &options.mount,
                &options.fuse_options,
            ) {
                Ok(()) => ExitCode::SUCCESS,
                Err(mount_error) => {
                    error!(%mount_error, "mount failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
