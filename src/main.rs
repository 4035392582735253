use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use neurostream::{
    handle_websocket, AppState, CloudEventSink, EventSink, PostgresEventSink, ServiceConfig,
    SessionRouter, SubscriberRegistry,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neurostream=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting neurostream acquisition service");

    let config = ServiceConfig::from_env()?;
    info!(
        "board: {} ({:?}), scoring profile: {:?}",
        config.board.board_id, config.board.kind, config.scoring_profile
    );

    // Optional downstream sinks; each is disabled simply by leaving its
    // endpoint unconfigured.
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    if let Some(url) = &config.database_url {
        info!("connecting to event store...");
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        let store = PostgresEventSink::new(pool);
        store.initialize().await?;
        sinks.push(Arc::new(store));
        info!("event persistence enabled");
    }
    if let Some(url) = &config.cloud_sync_url {
        sinks.push(Arc::new(CloudEventSink::new(url.clone())?));
        info!("cloud sync enabled");
    }

    let registry = SubscriberRegistry::new();
    let bind_addr = config.bind_addr.clone();
    let (session, _router_task) = SessionRouter::spawn(config, registry.clone(), sinks);

    let state = AppState { registry, session };
    let app = Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = bind_addr.parse()?;
    info!("listening on {addr}");
    info!("websocket endpoint: ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint. The update counter is the liveness signal: if it
/// stops moving while a recording is active, the pipeline has stalled.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let snapshot = state.session.snapshot();
    axum::Json(serde_json::json!({
        "status": "ok",
        "is_recording": snapshot.is_recording,
        "mode": snapshot.mode,
        "updates": state.session.update_count(),
        "subscribers": state.registry.len(),
    }))
}
