use std::sync::Arc;

use axum::middleware;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use cron_observer::config::Config;
use cron_observer::delete::{DeleteQueue, DeleteWorker};
use cron_observer::establish_connection;
use cron_observer::events::EventBus;
use cron_observer::execution::LifecycleService;
use cron_observer::schedule::ScheduleEngine;
use cron_observer::stats::FailureAggregator;
use cron_observer::{api, auth, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Cron Observer on port {}", config.port);

    // Connect to database (migrations run inside)
    let db = establish_connection(&config.database_url).await?;
    let db = Arc::new(db);

    // One cancellation token threads through every background loop.
    let cancel = CancellationToken::new();

    let bus = EventBus::new(config.event_bus_capacity);

    let lifecycle = Arc::new(LifecycleService::new(db.clone(), bus.clone()));
    let engine = Arc::new(ScheduleEngine::new(
        db.clone(),
        lifecycle.clone(),
        config.schedule_sync_interval_secs,
    ));
    let delete_queue = Arc::new(DeleteQueue::new(
        db.clone(),
        config.delete_visibility_timeout_secs,
        config.delete_max_attempts,
    ));
    let aggregator = Arc::new(FailureAggregator::new(db.clone()));

    // Failure aggregator subscribes before anything can publish.
    tokio::spawn(aggregator.clone().run(bus.clone(), cancel.clone()));

    // Scheduler loop (restores ACTIVE task registrations on startup).
    tokio::spawn(engine.clone().run(cancel.clone()));

    // Execution timeout watchdog.
    tokio::spawn(
        lifecycle
            .clone()
            .run_watchdog(config.watchdog_interval_secs, cancel.clone()),
    );

    // Delete workers.
    for _ in 0..config.delete_worker_count.max(1) {
        let worker = Arc::new(DeleteWorker::new(
            db.clone(),
            delete_queue.clone(),
            engine.clone(),
            bus.clone(),
            config.delete_poll_interval_ms,
        ));
        tokio::spawn(worker.run(cancel.clone()));
    }

    let port = config.port;
    let state = AppState {
        db,
        config: Arc::new(config),
        engine,
        lifecycle,
        delete_queue,
        stats: aggregator,
        bus,
    };

    let cors = CorsLayer::new()
        .allow_origin([
            format!("http://localhost:{port}").parse().unwrap(),
            format!("http://127.0.0.1:{port}").parse().unwrap(),
        ])
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-api-key"),
        ]);

    let app = api::create_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;
    tracing::info!("Cron Observer listening on http://0.0.0.0:{port}");

    let shutdown_cancel = cancel.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Received shutdown signal");
        shutdown_cancel.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Make sure background loops observe cancellation even if the server
    // stopped for another reason.
    cancel.cancel();

    tracing::info!("Application shutdown complete");
    Ok(())
}
