//! mwshell Server Binary
//!
//! Command-line interface for the multi-tenant web shell database server.
//!
//! # Examples
//!
//! ```bash
//! # Start the server
//! mwshell serve --bind 0.0.0.0 --port 5000
//!
//! # Start without the idle-tenant sweeper
//! mwshell serve --no-sweeper
//!
//! # Show the effective quota configuration
//! mwshell config
//! ```

use clap::{Args, Parser, Subcommand};
use mwshell::server::{start_server, ServerConfig};
use mwshell::{Config, MemoryStore, ShellService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// mwshell - Multi-tenant web shell database server
#[derive(Parser, Debug)]
#[command(name = "mwshell")]
#[command(version = mwshell::VERSION)]
#[command(about = "Multi-tenant web shell database server", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "MWS_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the web shell server
    Serve(ServeArgs),

    /// Print the effective configuration
    Config,

    /// Show server version
    Version,
}

/// Server configuration arguments
#[derive(Args, Debug)]
struct ServeArgs {
    /// HTTP bind address
    #[arg(short, long, default_value = "0.0.0.0", env = "MWS_BIND")]
    bind: String,

    /// HTTP port
    #[arg(short, long, default_value = "5000", env = "MWS_PORT")]
    port: u16,

    /// Disable the idle-tenant expiry sweeper
    #[arg(long)]
    no_sweeper: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Serve(args) => serve_command(args).await,
        Commands::Config => {
            let config = Config::from_env();
            println!("{:#?}", config);
            Ok(())
        }
        Commands::Version => {
            println!("mwshell {}", mwshell::VERSION);
            Ok(())
        }
    }
}

async fn serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config::from_env();
    let store = Arc::new(MemoryStore::new());
    let service = ShellService::new(store, config);

    let server_config = ServerConfig {
        http_addr: args.bind,
        http_port: args.port,
        enable_sweeper: !args.no_sweeper,
    };
    start_server(server_config, service).await
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "mwshell.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}
