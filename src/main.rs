use std::io::Write;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::error;

use tftpc::tftp::client::{Client, ClientConfig, DEFAULT_PORT, FileConfig};
use tftpc::tftp::core::Mode;

#[derive(Parser)]
#[command(name = "tftpc", version, about = "RFC 1350 TFTP client")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server host name or address
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Server request port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Time to wait for each reply, e.g. "5s" or "500ms"
    #[arg(short, long, global = true, value_parser = humantime_serde::re::humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Retransmissions before giving up
    #[arg(short, long, global = true)]
    retries: Option<u8>,

    /// Transfer mode
    #[arg(short, long, global = true, value_enum)]
    mode: Option<Mode>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a file from the server
    Get {
        /// File name on the server
        remote: String,
        /// Local save path (defaults to the remote file name)
        local: Option<PathBuf>,
    },
    /// Upload a file to the server
    Put {
        /// Local file path
        local: PathBuf,
        /// File name on the server (defaults to the local file name)
        remote: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let host = cli
        .server
        .clone()
        .or_else(|| file.server.clone())
        .context("No server given; use --server or set `server` in the config file")?;
    let port = cli.port.or(file.port).unwrap_or(DEFAULT_PORT);
    let server_ip = resolve(&host, port)?;

    let config = ClientConfig::new(server_ip, DEFAULT_PORT)
        .merge_file(&file)
        .merge_cli(cli.port, cli.timeout, cli.retries, cli.mode);
    let client = Client::new(config);

    match cli.command {
        Command::Get { remote, local } => {
            let local = local.unwrap_or_else(|| default_local_name(&remote));
            client
                .get(&remote, &local)
                .with_context(|| format!("Download of {} from {} failed", remote, host))?;
        }
        Command::Put { local, remote } => {
            let remote = match remote {
                Some(remote) => remote,
                None => local
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .with_context(|| format!("Cannot derive a remote name from {}", local.display()))?,
            };
            client
                .put(&local, &remote)
                .with_context(|| format!("Upload of {} to {} failed", local.display(), host))?;
        }
    }
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<IpAddr> {
    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", host))?
        .next()
        .with_context(|| format!("No address found for {}", host))?;
    Ok(addr.ip())
}

fn default_local_name(remote: &str) -> PathBuf {
    Path::new(remote)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(remote))
}
