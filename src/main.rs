//! BahtBot - CNY→THB TT-rate desk service
//!
//! Aggregates exchange quotes from public sources, lets customers join a
//! first-come-first-served service queue, and fires one-shot price alerts.
//! Two background loops keep quotes fresh and evaluate alerts; everything
//! else is request-driven through the HTTP API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bahtbot_backend::{
    alerts::AlertManager,
    api::{self, AppState},
    config::Config,
    db::Database,
    delivery::{LogNotifier, Notifier},
    queue::QueueManager,
    rates::{custom::CustomRateStore, sources},
    scheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("🚀 BahtBot starting");

    let config = Config::from_env()?;
    let db = Database::open(&config.database_path)?;

    let http_client = sources::build_http_client()?;
    let rate_sources = sources::default_sources(&http_client);

    let snapshot = scheduler::new_shared_snapshot();
    let queue = Arc::new(QueueManager::new(db.clone()));
    let alerts = Arc::new(AlertManager::new(db.clone()));
    let custom = Arc::new(CustomRateStore::new(
        db.clone(),
        &config.house_provider,
        config.default_spread,
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    // Refresh and evaluation run on independent schedules; neither blocks
    // the other and a failed cycle only affects itself.
    tokio::spawn(scheduler::refresh_loop(
        rate_sources,
        db.clone(),
        snapshot.clone(),
        config.refresh_interval_secs,
    ));
    tokio::spawn(scheduler::evaluate_loop(
        snapshot.clone(),
        alerts.clone(),
        notifier.clone(),
        config.alert_interval_secs,
    ));

    let state = AppState {
        db,
        queue,
        alerts,
        custom,
        snapshot,
        notifier,
        public_providers: Arc::new(config.public_providers.clone()),
        admin_user_ids: Arc::new(config.admin_user_ids.clone()),
        rate_band: config.rate_band,
    };

    let app = api::create_router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bahtbot_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
