use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use livefeed::broker::Broadcaster;
use livefeed::config::{self, Backend, Settings, load_config};
use livefeed::feed::FeedService;
use livefeed::persistence::{MemoryStore, MessageStore, SledStore};
use livefeed::queue::{BackpressureQueue, DurableLog, MemoryLog, SledLog};
use livefeed::transport::websocket::{Services, start_websocket_server};
use livefeed::utils::{Context, logging};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.log.level);

    if let Err(e) = run_server(settings).await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

fn open_store(settings: &Settings) -> livefeed::utils::Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match settings.store.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Sled => Arc::new(SledStore::open(
            &settings.store.path,
            settings.store.max_messages,
        )?),
    };
    info!(backend = ?settings.store.backend, "Message store opened");
    Ok(store)
}

fn open_log(settings: &Settings) -> livefeed::utils::Result<Arc<dyn DurableLog>> {
    let log: Arc<dyn DurableLog> = match settings.queue.backend {
        Backend::Memory => Arc::new(MemoryLog::new()),
        Backend::Sled => Arc::new(SledLog::open(&settings.queue.path)?),
    };
    info!(backend = ?settings.queue.backend, "Durable log opened");
    Ok(log)
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn Error>> {
    let ctx = Context::new();
    let store = open_store(&settings)?;
    let log = open_log(&settings)?;
    let broadcaster = Arc::new(Broadcaster::new(Duration::from_millis(
        settings.feed.delivery_timeout_ms,
    )));

    let queue = Arc::new(BackpressureQueue::new(
        ctx.clone(),
        log.clone(),
        store.clone(),
        broadcaster.clone(),
        &settings.queue.consumer_group,
        config::start_offset(&settings)?,
    )?);
    queue.start(settings.queue.workers);

    let feeds = Arc::new(FeedService::new(
        ctx.clone(),
        store.clone(),
        broadcaster.clone(),
        settings.feed.channel_capacity,
    ));

    let services = Services {
        queue: queue.clone(),
        feeds,
    };
    let addr = settings.server_addr();
    let server = tokio::spawn(start_websocket_server_owned(addr, services, ctx.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
        _ = ctx.cancelled() => {}
    }

    ctx.cancel();
    queue.shutdown().await;
    log.flush().await?;
    broadcaster.close();
    store.close().await?;

    match server.await {
        Ok(Err(e)) => error!("WebSocket server exited with error: {}", e),
        Err(e) => error!("WebSocket server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let stats = broadcaster.stats();
    info!(
        notified = stats.notified,
        delivered = stats.delivered,
        dropped = stats.dropped,
        "Stopped"
    );
    Ok(())
}

async fn start_websocket_server_owned(
    addr: String,
    services: Services,
    ctx: Context,
) -> livefeed::utils::Result<()> {
    let result = start_websocket_server(&addr, services, ctx.clone()).await;
    if result.is_err() {
        // Bring the rest of the process down with the server.
        ctx.cancel();
    }
    result
}
