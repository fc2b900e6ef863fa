use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use rand::Rng;
use tracing::info;

mod cli;
mod routes;

use gemrelay_admin::AdminState;
use gemrelay_core::Orchestrator;
use gemrelay_core::upstream::{GenerativeClient, UpstreamClientConfig, WreqGenerativeClient};
use gemrelay_store::{ConfigStore, CredentialStore, KvStore, SqliteKv};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("gemrelay failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let kv = SqliteKv::connect(&cli.dsn).await?;
    kv.sync().await?;
    info!(dsn = %cli.dsn, "db connected");

    let kv: Arc<dyn KvStore> = Arc::new(kv);
    let credentials = CredentialStore::new(kv.clone());
    let config = ConfigStore::new(kv);
    ensure_session_secret(&config).await?;

    let client: Arc<dyn GenerativeClient> =
        Arc::new(WreqGenerativeClient::new(UpstreamClientConfig::default())?);
    let orchestrator = Orchestrator::new(credentials.clone(), config.clone(), client.clone());
    let admin = AdminState {
        credentials,
        config: config.clone(),
        client,
        admin_password: cli.admin_password.clone(),
    };

    let app = routes::router(orchestrator, config, admin);
    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn ensure_session_secret(config: &ConfigStore) -> Result<(), Box<dyn Error + Send + Sync>> {
    if config.session_secret().await?.is_none() {
        let secret: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        config.set_session_secret(&secret).await?;
        info!("session secret initialized");
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gemrelay=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
