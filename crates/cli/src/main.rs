use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use server::config::{AppConfig, CONFIG_FILE};
use server::{create_router, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "casegen")]
#[command(about = "Compliance test-case generation service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP API
    Serve {
        /// Overrides `server.port`
        #[arg(short, long)]
        port: Option<u16>,

        /// Overrides `server.host`
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { force }) => init_config(&cli.config, force).await,
        Some(Commands::Serve { port, host }) => serve(&cli.config, port, host).await,
        None => serve(&cli.config, None, None).await,
    }
}

async fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    let content = AppConfig::default().to_toml()?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!();
    println!("Wrote default configuration to {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set ATLASSIAN_CLIENT_ID, ATLASSIAN_CLIENT_SECRET and ATLASSIAN_REDIRECT_URI");
    println!("     to enable issue-tracker sync");
    println!("  2. Run 'casegen serve' to start the API");

    Ok(())
}

async fn serve(path: &Path, port: Option<u16>, host: Option<String>) -> Result<()> {
    init_tracing();

    let mut config = AppConfig::load(path).await?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    tracing::info!(
        engine = ?config.engine.kind,
        max_feedback_rounds = config.lifecycle.max_feedback_rounds,
        tracker_configured = config.tracker.is_configured(),
        "Starting casegen"
    );

    let state = AppState::from_config(&config).context("Failed to build application state")?;
    state.spawn_background_tasks();
    let app = create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    println!();
    println!("casegen");
    println!("════════════════════════════════════════");
    println!();
    println!("  API Server:  http://{}", listener.local_addr()?);
    println!("  Swagger UI:  http://{}/swagger-ui", listener.local_addr()?);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "casegen=info,server=info,orchestrator=info,tracker=info,tower_http=info".into()
            }),
        )
        .init();
}
