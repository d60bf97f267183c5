mod config;
mod handlers;
mod notify;
mod server;
mod sweep;
#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use selo_blob::FsBlobStore;
use selo_crypto::{generate_share_token, share_token_hash, Clock, OsEntropy, SystemClock};
use selo_storage::{CreateUserParams, Role, Store};
use selo_store_sqlite::SqliteStore;

use config::ServerConfig;
use notify::LogNotifier;
use server::SeloServer;

#[derive(Parser)]
#[command(name = "selo-server")]
#[command(about = "selo electronic-signature service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:8080", env = "SELO_ADDR")]
        addr: String,
    },
    /// Create a tenant, an admin user and a session token for first-run
    /// provisioning
    Bootstrap {
        /// Tenant name
        #[arg(long)]
        tenant: String,
        /// Admin email
        #[arg(long)]
        email: String,
        /// Admin display name
        #[arg(long, default_value = "Administrator")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(
        SqliteStore::open(&config.database_url, Arc::clone(&clock))
            .await?
            .with_genesis_prefix(config.genesis_prefix.clone()),
    );

    match cli.command {
        Command::Serve { addr } => {
            let server = Arc::new(SeloServer {
                store,
                blob: Arc::new(FsBlobStore::new(&config.blob_root)),
                notifier: Arc::new(LogNotifier),
                clock,
                entropy: Arc::new(OsEntropy),
                config: config.clone(),
            });

            sweep::spawn(Arc::clone(&server));

            let app = handlers::router(server);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, blob_root = %config.blob_root.display(), "selo-server listening");
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        }
        Command::Bootstrap {
            tenant,
            email,
            name,
        } => {
            let tenant = store.create_tenant(&tenant).await?;
            let user = store
                .create_user(&CreateUserParams {
                    tenant_id: tenant.id,
                    email,
                    name,
                    role: Role::Admin,
                })
                .await?;
            let token = generate_share_token(&OsEntropy);
            store
                .create_session(&user.id, &share_token_hash(&token), Utc::now() + Duration::days(365))
                .await?;

            println!("tenant:        {}", tenant.id);
            println!("admin user:    {}", user.id);
            println!("session token: {}", token);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
