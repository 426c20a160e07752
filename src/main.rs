use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod chat;
mod config;
mod error;
mod footprint;
mod models;
mod server;
mod session;
mod storage;

use config::{AppConfig, StoreConfig};
use models::GeminiClient;
use storage::{SessionStore, SqliteStore};

#[derive(Debug, Parser)]
#[command(name = "ecomate")]
#[command(about = "Chat API that tracks the environmental impact of each exchange", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,
    },
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    match cli.command {
        Commands::Serve { listen } => {
            let addr: SocketAddr = listen.parse()?;
            let store: Option<Arc<dyn SessionStore>> = match &config.store {
                StoreConfig::Url(url) => Some(Arc::new(SqliteStore::initialize(url).await?)),
                StoreConfig::Unconfigured => {
                    tracing::warn!("DATABASE_URL not set, sessions will not be persisted");
                    None
                }
            };
            if config.generation.api_key.is_none() {
                tracing::warn!("GOOGLE_API_KEY not set, chat requests will be rejected");
            }
            let model = Arc::new(GeminiClient::new(&config.generation));
            let state = server::AppState::new(store, model);
            server::serve(addr, state).await?;
        }
        Commands::Check => check(&config).await?,
    }
    Ok(())
}

#[derive(Debug)]
enum StoreCheck {
    Unconfigured,
    Ok { sessions: usize },
    Broken { error: String },
}

async fn check_store(store: &StoreConfig) -> StoreCheck {
    let Some(url) = store.url() else {
        return StoreCheck::Unconfigured;
    };
    let store = match SqliteStore::initialize(url).await {
        Ok(store) => store,
        Err(err) => return StoreCheck::Broken { error: format!("{err:#}") },
    };
    match store.list_sessions().await {
        Ok(sessions) => StoreCheck::Ok { sessions: sessions.len() },
        Err(err) => StoreCheck::Broken { error: format!("{err:#}") },
    }
}

// exits non-zero only when DATABASE_URL is set but the database is unusable
async fn check(config: &AppConfig) -> anyhow::Result<()> {
    match config.store.url() {
        Some(url) => println!("DATABASE_URL     set ({url})"),
        None => println!("DATABASE_URL     not set (sessions will not be persisted)"),
    }
    let store_check = check_store(&config.store).await;
    match &store_check {
        StoreCheck::Unconfigured => {}
        StoreCheck::Ok { sessions } => println!("database         ok, {sessions} session(s)"),
        StoreCheck::Broken { error } => println!("database         FAILED: {error}"),
    }

    match &config.generation.api_key {
        Some(_) => println!("GOOGLE_API_KEY   set"),
        None => println!("GOOGLE_API_KEY   not set (chat will be rejected)"),
    }
    println!("GEMINI_MODEL     {}", config.generation.model);
    println!("GEMINI_BASE_URL  {}", config.generation.base_url);

    if let StoreCheck::Broken { .. } = store_check {
        anyhow::bail!("DATABASE_URL is set but the database is not usable");
    }
    Ok(())
}
