use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meridian::config::Config;
use meridian::models::StatusView;
use meridian::server::{AppState, Server};

#[derive(Parser)]
#[command(
    name = "meridian",
    version,
    about = "Country metadata and exchange-rate refresh service",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to MERIDIAN_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one refresh against the configured store and exit
    Refresh,

    /// Print the refresh status of the configured store
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = meridian::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                let ip = host
                    .parse::<std::net::IpAddr>()
                    .with_context(|| format!("Invalid host address: {host}"))?;
                config.server.bind_address.set_ip(ip);
            }
            if let Some(port) = port {
                config.server.bind_address.set_port(port);
            }
            serve(config).await
        }
        Commands::Refresh => refresh(config).await,
        Commands::Status => status(config),
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("meridian=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("meridian={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meridian=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let server = Server::new(&config)?;
    println!("{}", server.info().display());

    server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

async fn refresh(config: Config) -> Result<()> {
    config.validate()?;
    let state = AppState::from_config(&config)?;
    let refresher = Arc::clone(&state.refresher);

    let outcome = refresher.refresh().await?;

    println!("Refresh completed");
    println!("  Total countries: {}", outcome.total_countries);
    println!("  Inserted: {}", outcome.inserted);
    println!("  Updated: {}", outcome.updated);
    println!("  Skipped: {}", outcome.skipped);
    println!("  Last refreshed at: {}", outcome.last_refreshed_at.to_rfc3339());
    Ok(())
}

fn status(config: Config) -> Result<()> {
    let repo = meridian::storage::open_repository(&config.database)?;
    let view = StatusView::from(repo.status()?);

    println!("Total countries: {}", view.total_countries);
    match view.last_refreshed_at {
        Some(at) => println!("Last refreshed at: {}", at.to_rfc3339()),
        None => println!("Last refreshed at: never"),
    }
    Ok(())
}
