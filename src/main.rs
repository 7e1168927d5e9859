use clap::{Parser, Subcommand};
use courier_core::config;
use courier_ingest::HttpConnector;
use courier_session::{qr, SessionManager, StartOutcome};
use courier_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "Courier — messaging session & ingestion service"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured session (pairing via QR) and run until
    /// interrupted. Webhook ingestion and backfill are driven by the
    /// embedding API layer through the library crates.
    Start,
    /// Check store and session configuration.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Start => run(&cli.config).await,
        Commands::Status => status(&cli.config).await,
    }
}

async fn run(config_path: &str) -> anyhow::Result<()> {
    let cfg = config::load(config_path)?;

    let store = Store::new(&cfg.store).await?;
    let connector = Arc::new(HttpConnector::new(&cfg.provider)?);
    let sessions = Arc::new(SessionManager::new(
        connector,
        cfg.session.clone(),
        Duration::from_secs(cfg.provider.timeout_secs),
    ));

    let session_id = &cfg.courier.session_id;
    match sessions.start(session_id, &cfg.courier.account_id).await? {
        StartOutcome::QrIssued { payload } => {
            println!("Scan this QR code with the messaging app:\n");
            println!("{}", qr::qr_terminal(&payload)?);
        }
        StartOutcome::PhonePairing => {
            println!(
                "This deployment pairs by phone number. \
                 Submit your number through the pairing API to get a code."
            );
        }
        StartOutcome::AlreadyActive(state) => {
            info!("session {session_id} already {state}");
        }
    }

    info!(
        "courier running | session: {session_id} | provider: {} | history: {} messages",
        cfg.provider.base_url,
        store.message_count().await?,
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    sessions.stop_all().await;
    Ok(())
}

async fn status(config_path: &str) -> anyhow::Result<()> {
    let cfg = config::load(config_path)?;
    let store = Store::new(&cfg.store).await?;

    println!("store: {}", cfg.store.db_path);
    println!("  messages:     {}", store.message_count().await?);
    println!("  size:         {} bytes", store.db_size().await?);
    println!("  active rules: {}", store.active_rules().await?.len());
    println!("provider: {}", cfg.provider.base_url);
    println!(
        "session:  {} ({})",
        cfg.courier.session_id, cfg.courier.account_id
    );
    Ok(())
}
