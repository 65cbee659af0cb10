use anyhow::Result;
use signals_analytics::{AnalyticsQueue, Correlator, RetryPolicy};
use signals_api::{run as run_api, ApiState};
use signals_core::{AppContext, Config};
use signals_delivery::DeliveryService;
use signals_device::{resolve_identity, select_capabilities, DeviceRegistrar, HeadlessPlatform, LogPresenter};
use signals_notify::consumer::run as run_consumer;
use signals_notify::{channel, BusConsumer, Dispatcher, LogNavigator};
use signals_sync::SyncScheduler;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BUS_CAPACITY: usize = 256;
const ANALYTICS_QUEUE_CAPACITY: usize = 1024;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!("Starting Trading Signals notification server");

    let config = Config::from_env();
    let ctx = AppContext::new(config).await?;

    tracing::info!("Application context initialized");

    // Credential problems only disable gateway sends; anything left to fail
    // here is the HTTP client itself.
    let delivery = Arc::new(DeliveryService::from_config(&ctx.config.delivery, ctx.store.clone()).await?);

    // This process is itself one installation: it owns an identity and a
    // profile, and receives pushes through the bus.
    let identity = resolve_identity(ctx.storage.as_ref()).await;
    let headless = Arc::new(HeadlessPlatform::new(env::var("DEVICE_PUSH_TOKEN").ok()));
    let presenter = Arc::new(LogPresenter);
    let capabilities = select_capabilities(&ctx.config.device, headless.clone(), headless, presenter.clone());
    let platform = capabilities.platform();

    let registrar = DeviceRegistrar::new(
        ctx.store.clone(),
        identity.clone(),
        platform,
        ctx.config.device.app_version.clone(),
    );
    let token = capabilities.obtain_token().await;
    if let Err(e) = registrar.register(token).await {
        tracing::warn!("Device registration failed, continuing unregistered: {}", e);
    }

    let dispatcher = Arc::new(Dispatcher::new(ctx.store.clone(), identity.clone(), platform));

    let correlator = Arc::new(Correlator::new(ctx.store.clone()));
    let (analytics, _analytics_worker) =
        AnalyticsQueue::spawn(correlator, ANALYTICS_QUEUE_CAPACITY, RetryPolicy::default());

    let (bus, bus_rx) = channel(BUS_CAPACITY);
    let consumer = BusConsumer::new(
        dispatcher.clone(),
        presenter,
        Arc::new(LogNavigator),
        analytics,
        identity.as_str(),
        platform,
    );
    tokio::spawn(async move {
        if let Err(e) = run_consumer(consumer, bus_rx).await {
            tracing::error!("Notification bus consumer error: {}", e);
        }
    });

    let scheduler = SyncScheduler::new(dispatcher, ctx.storage.clone());
    scheduler.initialize(capabilities.schedule_background()).await;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = registrar.heartbeat().await {
                tracing::warn!("Device heartbeat failed: {}", e);
            }
        }
    });

    let state = ApiState::new(ctx, delivery, scheduler.clone(), bus);

    tracing::info!("Starting API server");
    tokio::select! {
        result = run_api(state) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
    }

    scheduler.shutdown().await;
    Ok(())
}
