//! ---
//! rl_section: "04-cli-frontend"
//! rl_subsection: "binary"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Command line client for the racelog telemetry service."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use rl_common::{init_tracing, CliConfig, LogFormat, VersionInfo};

mod event;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "racelog command line client",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    /// Destination server address (host:port).
    #[arg(long, global = true)]
    addr: Option<String>,
    /// Connect to the destination without TLS (development only).
    #[arg(long, global = true)]
    insecure: bool,
    /// Authentication token.
    #[arg(short = 't', long, global = true)]
    token: Option<String>,
    /// Log filter level (e.g. info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Emit structured JSON logs instead of the human-readable format.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Event related actions")]
    Event(event::EventCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }

    let loaded = CliConfig::load_with_source(&["rlctl.toml"])?;
    let config_source = loaded.source;
    let mut config = loaded.config;
    if let Some(addr) = &cli.addr {
        config.addr = addr.clone();
    }
    if cli.insecure {
        config.insecure = true;
    }
    if let Some(token) = &cli.token {
        config.token = Some(token.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.log_json {
        config.logging.format = LogFormat::StructuredJson;
    }
    init_tracing("rlctl", &config.logging)?;
    if let Some(source) = &config_source {
        tracing::debug!(config_path = %source.display(), "configuration loaded");
    }

    match cli.command {
        Some(Commands::Event(cmd)) => event::run(cmd, &config).await?,
        None => bail!("no command given (try --help)"),
    }
    Ok(())
}
