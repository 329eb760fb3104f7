use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storycollab_server::SessionManager;
use storycollab_server::config::Config;
use storycollab_server::server::{AppState, ws_handler};
use storycollab_server::session::state::StoryConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    websocket: &'static str,
    uptime_seconds: u64,
}

async fn health() -> Json<HealthResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        websocket: "ready", // WebSocket is always ready if server is running
        uptime_seconds: uptime,
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    /// Server uptime in seconds
    uptime_seconds: u64,
    /// Server version
    version: &'static str,
    /// Number of active stories
    active_stories: usize,
    /// Total WebSocket connections
    total_connections: usize,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let (stories, connections) = state.get_stats().await;

    Json(MetricsResponse {
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION"),
        active_stories: stories,
        total_connections: connections,
    })
}

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Initialize the Prometheus metrics recorder
fn setup_prometheus_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    let handle = PROMETHEUS_HANDLE
        .get()
        .expect("Prometheus handle not initialized");
    handle.render()
}

/// Update gauge metrics for stories and connections (called periodically)
async fn update_gauge_metrics(state: &AppState) {
    let (stories, connections) = state.get_stats().await;

    metrics::gauge!("storycollab_stories_active").set(stories as f64);
    metrics::gauge!("storycollab_ws_connections_active").set(connections as f64);

    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    metrics::gauge!("storycollab_uptime_seconds").set(uptime as f64);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Record server start time
    START_TIME.set(Instant::now()).ok();

    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = setup_prometheus_metrics();
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storycollab=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}",
        config.host, config.port
    );
    if let Some(ref base_url) = config.public_base_url {
        info!("Public base URL: {}", base_url);
    }

    // Create shared application state with the story session config
    let story_config = StoryConfig {
        max_duration: config.story.max_duration,
        initiator_grace_period: config.story.initiator_grace_period,
        max_joiners: config.story.max_joiners,
        picture_count: config.pictures.count,
    };
    let session_manager = Arc::new(SessionManager::with_config(story_config));

    let app_state = AppState::new().with_session_manager(session_manager);

    // Periodic cleanup for expired stories; remaining peers are notified
    let cleanup_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_state.reap_expired_stories().await;
        }
    });

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("StoryCollab server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
