use anyhow::{Context, Result};
use lib_relay::store::{MemoryStore, MessageStore, RedisStore};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

mod chat_logic;
use chat_logic::config::{self, Settings, StoreKind};
use chat_logic::{downstream, logger, state::ChatState};

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so clap's env lookups see its values
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    let settings = config::load_config().settings();
    logger::setup_logging(&settings.log_dir, &settings.log_level).context("Failed to setup logging")?;
    log::info!(
        "Starting chat relay: port={} store={:?} origin={}",
        settings.port,
        settings.store,
        settings.client_origin.as_deref().unwrap_or("*")
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let server_handle = match settings.store {
        StoreKind::Redis => {
            let store = RedisStore::connect(&settings.redis_uri, settings.store_timeout)
                .await
                .context("Failed to connect to redis")?;
            spawn_server(settings, store, shutdown_tx.clone()).await
        }
        StoreKind::Memory => {
            log::warn!("Using in-memory message store; history is lost on restart.");
            spawn_server(settings, MemoryStore::new(), shutdown_tx.clone()).await
        }
    };

    wait_for_signal().await;

    // Stop the listener and every live socket task
    let _ = shutdown_tx.send(());

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Server error: {:#}", e),
        Err(e) => log::error!("Server task failed: {}", e),
    }

    log::info!("Shutdown complete.");
    Ok(())
}

async fn spawn_server<S: MessageStore>(
    settings: Settings,
    store: S,
    shutdown: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<Result<()>> {
    if let Err(e) = store.ping().await {
        log::warn!("Message store not reachable at startup: {}", e);
    }
    let state = ChatState::new(Arc::new(store), settings.outbound_queue, shutdown);
    tokio::spawn(downstream::run(settings, state))
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Could not install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
