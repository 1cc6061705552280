//! rexpet-server binary
//!
//! Wires storage, queue, generator and payments from the environment, seeds
//! the style catalog, spawns generation workers and the reaper, and serves
//! the HTTP API until Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rexpet_core::{
    FsObjectStorage, ImageGenerator, JobQueue, MemoryJobQueue, MemoryObjectStorage, MemoryStore,
    ObjectStorage, Store,
};
use rexpet_payments::{CheckoutService, StripeClient};
use rexpet_runtime::{GeminiConfig, GeminiGenerator, MockGenerator};
use rexpet_server::{AppState, ServerConfig, build_router};
use rexpet_sqlite::Database;
use rexpet_studio::{
    GenerationWorker, Reaper, StudioConfig, built_in_styles, load_styles, seed_styles,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    let studio = StudioConfig::from_env();

    // Backends
    let (store, queue): (Arc<dyn Store>, Arc<dyn JobQueue>) = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            tracing::info!("✓ SQLite store and job queue");
            (Arc::new(db.store()), Arc::new(db.queue()))
        }
        None => {
            tracing::warn!("⚠ DATABASE_URL not set - credits and jobs are kept in memory");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryJobQueue::new()))
        }
    };
    let storage: Arc<dyn ObjectStorage> = match &config.storage_root {
        Some(root) => Arc::new(FsObjectStorage::new(root)),
        None => {
            tracing::warn!("⚠ STORAGE_ROOT not set - images are kept in memory");
            Arc::new(MemoryObjectStorage::new())
        }
    };

    // Image generator
    let generator: Arc<dyn ImageGenerator> = match GeminiConfig::from_env() {
        Some(gemini) => Arc::new(GeminiGenerator::from_config(gemini)?),
        None => {
            tracing::warn!("⚠ GEMINI_API_KEY not set - using mock generator");
            Arc::new(MockGenerator::echo())
        }
    };

    match generator.health_check().await {
        Ok(true) => {
            let info = generator.info();
            tracing::info!("✓ Generator ready: {} ({})", info.name, info.model);
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Generator not reachable - generations will fail and refund");
        }
    }

    // Style catalog
    let styles = match &config.styles_path {
        Some(path) => load_styles(path).await?,
        None => built_in_styles(),
    };
    seed_styles(&store, styles).await?;

    // Build application state
    let mut state = AppState::new(
        store.clone(),
        storage.clone(),
        queue.clone(),
        generator.clone(),
        config.clone(),
    );

    // Initialize payments
    match StripeClient::from_env() {
        Ok(stripe) => {
            let secret = stripe.webhook_secret().to_string();
            state = state.with_payments(CheckoutService::new(Arc::new(stripe)), &secret);
            tracing::info!("✓ Stripe configured");
        }
        Err(_) => {
            tracing::warn!("⚠ Stripe not configured - payments disabled");
            tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET in .env");
        }
    }

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for _ in 0..studio.worker_concurrency.max(1) {
        let worker = GenerationWorker::new(
            store.clone(),
            storage.clone(),
            generator.clone(),
            queue.clone(),
            studio.clone(),
        );
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    let reaper = Reaper::new(store.clone(), queue.clone(), &studio);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { reaper.run(rx).await }));

    tracing::info!(
        workers = studio.worker_concurrency,
        timeout_secs = studio.generation_timeout.as_secs(),
        "Generation workers started"
    );

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 rexpet server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                  - Health check");
    tracing::info!("  GET  /api/styles              - List styles");
    tracing::info!("  GET  /api/credits             - Balance and history");
    tracing::info!("  POST /api/checkout            - Create Stripe checkout");
    tracing::info!("  POST /webhook/stripe          - Stripe webhook");
    tracing::info!("  POST /api/originals           - Upload original photo");
    tracing::info!("  POST /api/generations         - Request portrait");
    tracing::info!("  POST /api/generations/status  - Poll portrait");
    tracing::info!("  GET  /api/generations         - Portrait history");
    tracing::info!("  GET  /api/profile             - Profile");
    tracing::info!("  PUT  /api/profile             - Update display name");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await?;

    tracing::info!("Shutting down workers");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task panicked");
        }
    }

    Ok(())
}
