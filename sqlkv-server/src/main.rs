use shared::config::{Config, ServerConfig};
use sqlkv::Client;
use std::sync::Arc;
use storage_engine::SqliteStoreFactory;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting sqlkv server");

    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();
    let server_config = ServerConfig::from_env();

    let store = SqliteStoreFactory.open(&config)?;
    if let Some(path) = &server_config.init_sql {
        info!("Running init SQL from {}", path);
        let sql = std::fs::read_to_string(path)?;
        store.execute_batch(&sql).await?;
    }

    let client = Arc::new(Client::new(config, Arc::new(store))?);
    info!("Client ready: {:?}", client);

    let listener = TcpListener::bind(server_config.address()).await?;
    info!("TCP Server listening on tcp://{}", server_config.address());

    let accept_loop = async {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("TCP connection from {addr}");
                    let client = client.clone();

                    tokio::spawn(async move {
                        if let Err(err) = server_tcp::process_connection(socket, client).await {
                            warn!("TCP connection {addr} error: {err:?}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("TCP accept error: {}", e);
                }
            }
        }
    };

    tokio::select! {
        _ = accept_loop => {},
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    // Open connections keep a reference; the last drop cancels refresh.
    match Arc::try_unwrap(client) {
        Ok(client) => client.shutdown().await,
        Err(_) => info!("Connections still open, refresh task cancelled on drop"),
    }

    info!("sqlkv server shut down");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
