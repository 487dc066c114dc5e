use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use cogito_agent::ModelRegistry;
use cogito_core::config::CogitoConfig;
use cogito_threads::ThreadStore;
use cogito_users::UserStore;

mod app;
mod cli;
mod http;
mod session;
mod turn;
mod ws;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cogito_gateway=info,cogito_agent=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > COGITO_CONFIG env > ~/.cogito/cogito.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("COGITO_CONFIG").ok());
    let config = CogitoConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CogitoConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::InitDb => cli::init_db(&config),
        Command::User { action } => cli::run_user_command(&config, action),
    }
}

async fn serve(config: CogitoConfig) -> anyhow::Result<()> {
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let db_path = config.database.path.clone();
    info!(path = %db_path, "opening SQLite database");

    // each store gets its own connection; the first one runs migrations
    let users = UserStore::new(cli::open_db(&db_path)?);
    let threads = ThreadStore::new(rusqlite::Connection::open(&db_path)?);
    info!("database migrations complete");

    if config.gateway.auth.mode == cogito_core::config::AuthMode::Password && users.count()? == 0 {
        warn!("password auth is enabled but no users exist; add one with `cogito user add <name>`");
    }

    let registry = ModelRegistry::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, registry, users, threads));
    let router = app::build_router(state);

    info!("Cogito gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
