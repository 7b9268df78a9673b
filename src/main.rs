use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registrar::config::{Backend, Config};
use registrar::registrar::server::RegistrarServer;

#[derive(Parser)]
#[command(
    name = "registrar",
    version,
    about = "Service registry for a service-oriented local cloud",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a registrar instance
    Serve {
        /// Bind endpoint (host:port)
        #[arg(short, long)]
        bind: Option<String>,

        /// Peer registrar base URLs, repeatable
        #[arg(short, long)]
        peer: Vec<String>,

        /// Store backend (ephemeral, relational)
        #[arg(long)]
        backend: Option<String>,

        /// Database file path (relational backend only)
        #[arg(long)]
        database_file: Option<String>,

        /// Coordinator tick in seconds
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Peer status poll deadline in seconds
        #[arg(long)]
        status_timeout: Option<u64>,
    },

    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            bind,
            peer,
            backend,
            database_file,
            poll_interval,
            status_timeout,
        } => {
            let config = effective_config(
                bind,
                peer,
                backend,
                database_file,
                poll_interval,
                status_timeout,
            )?;
            serve(config).await?;
        }

        Commands::Config => {
            let config = Config::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Environment configuration overridden by command-line flags
fn effective_config(
    bind: Option<String>,
    peers: Vec<String>,
    backend: Option<String>,
    database_file: Option<String>,
    poll_interval: Option<u64>,
    status_timeout: Option<u64>,
) -> Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(bind) = bind {
        config.bind_endpoint = bind.parse()?;
    }
    if !peers.is_empty() {
        config.peer_endpoints = peers;
    }
    if let Some(backend) = backend {
        config.backend = backend.parse::<Backend>()?;
    }
    if let Some(path) = database_file {
        config.database_file = path.into();
    }
    if let Some(secs) = poll_interval {
        config.poll_interval_seconds = secs;
    }
    if let Some(secs) = status_timeout {
        config.peer_status_timeout_seconds = secs;
    }

    config.validate()?;
    Ok(config)
}

async fn serve(config: Config) -> Result<()> {
    let server = RegistrarServer::new(config)?;

    // First ctrl-c starts the graceful wind-down
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(true);
        }
    });

    server.start().await?;
    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("registrar=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("registrar=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
