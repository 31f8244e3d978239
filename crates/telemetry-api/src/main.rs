// Telemetry API server
// Decision: one SQLite file behind a sqlx pool; live viewers over SSE
// Accepted events are written once per dedup window and fanned out to viewers

mod config;
mod error;
mod events;
mod live;
mod queries;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use telemetry_core::{GeoConfig, HttpGeoResolver, IngestConfig, IngestPipeline, LocationRecord};
use telemetry_storage::{Database, DbEventStore, StorageConfig};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ServerConfig;
use crate::live::LiveHub;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn index() -> &'static str {
    "Telemetry API v1"
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        events::ingest_event,
        queries::list_types,
        queries::list_events,
        live::stream_live,
        live::echo,
    ),
    components(
        schemas(
            events::IngestRequest,
            queries::EventEntry,
            queries::EventsResponse,
            live::EchoRequest,
            LocationRecord,
        )
    ),
    tags(
        (name = "events", description = "Event ingestion"),
        (name = "queries", description = "Historical event queries"),
        (name = "live", description = "Live event stream (SSE)")
    ),
    info(
        title = "Telemetry API",
        version = "0.1.0",
        description = "Ingests application telemetry events, stores them and streams them to live viewers",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "telemetry_api=debug,telemetry_core=debug,telemetry_storage=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("telemetry-api starting...");

    let server_config = ServerConfig::from_env().context("Invalid server configuration")?;
    let ingest_config = IngestConfig::from_env().context("Invalid ingest configuration")?;
    let geo_config = GeoConfig::from_env().context("Invalid geolocation configuration")?;
    let storage_config = StorageConfig::from_env().context("Invalid storage configuration")?;

    // Initialize database
    let db = Database::connect(&storage_config)
        .await
        .with_context(|| format!("Failed to open database at {}", storage_config.path))?;
    db.migrate().await.context("Failed to create events table")?;
    tracing::info!(path = %storage_config.path, "Connected to database");

    tracing::info!(
        window_minutes = ingest_config.dedup_window.num_minutes(),
        mode = ?ingest_config.dedup_mode,
        geo_policy = ?ingest_config.geo_policy,
        "Dedup configured"
    );

    let geo = HttpGeoResolver::new(geo_config).context("Failed to build geolocation client")?;
    let hub = LiveHub::new(server_config.live_capacity);
    let pipeline = Arc::new(IngestPipeline::new(
        ingest_config,
        Arc::new(DbEventStore::new(db)),
        Arc::new(geo),
        Arc::new(hub.clone()),
    ));

    if server_config.cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?server_config.cors_origins, "CORS origins configured");
    }

    let app = build_app(pipeline, hub, server_config.cors_origins.clone());

    // Start server
    let addr = server_config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

/// Assemble every route and layer around a ready pipeline (extracted for testing)
fn build_app(
    pipeline: Arc<IngestPipeline>,
    hub: LiveHub,
    cors_origins: Vec<HeaderValue>,
) -> Router {
    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(events::routes(events::AppState::new(pipeline.clone())))
        .merge(queries::routes(queries::AppState::new(pipeline)))
        .merge(live::routes(live::AppState::new(hub)))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // Add CORS layer only if origins are configured
    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::CACHE_CONTROL,
                ]),
        )
    } else {
        app
    };

    app.layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
