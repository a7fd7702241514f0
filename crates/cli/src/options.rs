//! Command-line parsing.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command, value_parser};

/// Options for daemon mode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerOptions {
    /// Listen port.
    pub port: u16,
    /// Directory the chunk files are stored under.
    pub root: PathBuf,
    /// Log file, stderr when absent.
    pub log: Option<PathBuf>,
}

/// Options for mount-client mode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientOptions {
    /// FUSE mount point.
    pub mount: PathBuf,
    /// Local metadata root.
    pub root: PathBuf,
    /// Storage node addresses, in node-index order.
    pub servers: Vec<String>,
    /// Log file, stderr when absent.
    pub log: Option<PathBuf>,
    /// Extra options handed through to the FUSE layer.
    pub fuse_options: Vec<String>,
}

/// The selected operating mode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Mode {
    /// Run as a storage-node daemon.
    Server(ServerOptions),
    /// Run as the mount client.
    Client(ClientOptions),
}

impl Mode {
    /// The `--log` path, if one was given.
    #[must_use]
    pub fn log_file(&self) -> Option<&PathBuf> {
        match self {
            Mode::Server(options) => options.log.as_ref(),
            Mode::Client(options) => options.log.as_ref(),
        }
    }
}

fn command() -> Command {
    Command::new("stripefs")
        .about("Striped network filesystem with single-parity redundancy")
        .arg(
            Arg::new("client")
                .short('c')
                .long("client")
                .action(ArgAction::SetTrue)
                .help("Run as the mount client instead of a storage daemon"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_parser(value_parser!(u16))
                .help("Listen port (server mode)"),
        )
        .arg(
            Arg::new("mount")
                .short('m')
                .long("mount")
                .value_parser(value_parser!(PathBuf))
                .help("Mount point (client mode) or storage directory (server mode)"),
        )
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .value_parser(value_parser!(PathBuf))
                .help("Local metadata root (client mode)"),
        )
        .arg(
            Arg::new("servers")
                .long("servers")
                .value_delimiter(',')
                .help("Comma-separated storage node addresses, host:port"),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .long("log")
                .value_parser(value_parser!(PathBuf))
                .help("Write diagnostics to this file instead of stderr"),
        )
        .arg(
            Arg::new("fuse-option")
                .short('o')
                .action(ArgAction::Append)
                .help("Extra mount option passed through to the FUSE layer"),
        )
}

fn missing(cmd: &mut Command, what: &str) -> clap::Error {
    cmd.error(
        ErrorKind::MissingRequiredArgument,
        format!("{what} is required"),
    )
}

/// Parses `args` into a [`Mode`].
pub fn parse<I, S>(args: I) -> Result<Mode, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    let mut cmd = command();
    let mut matches = cmd.try_get_matches_from_mut(args)?;

    let mount: Option<PathBuf> = matches.remove_one("mount");
    let log: Option<PathBuf> = matches.remove_one("log");

    if matches.get_flag("client") {
        let Some(mount) = mount else {
            return Err(missing(&mut cmd, "--mount"));
        };
        let Some(root) = matches.remove_one::<PathBuf>("root") else {
            return Err(missing(&mut cmd, "--root"));
        };
        let servers: Vec<String> = matches
            .remove_many("servers")
            .map(|values| values.collect())
            .unwrap_or_default();
        if servers.is_empty() {
            return Err(missing(&mut cmd, "--servers"));
        }
        let fuse_options = matches
            .remove_many("fuse-option")
            .map(|values| values.collect())
            .unwrap_or_default();

        Ok(Mode::Client(ClientOptions {
            mount,
            root,
            servers,
            log,
            fuse_options,
        }))
    } else {
        let Some(port) = matches.remove_one::<u16>("port") else {
            return Err(missing(&mut cmd, "--port"));
        };
        let Some(root) = mount else {
            return Err(missing(&mut cmd, "--mount"));
        };

        Ok(Mode::Server(ServerOptions { port, root, log }))
    }
}
