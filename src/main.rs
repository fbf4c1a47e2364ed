mod auth;
mod bus;
mod config;
mod docs;
mod gateway;
mod handlers;
mod jobs;
mod models;
mod repositories;
mod routes;
mod services;
mod store;
#[cfg(test)]
mod testutil;
mod websocket;

use std::panic;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use bus::LocalEventBus;
use config::Config;
use docs::ApiDoc;
use gateway::Gateway;
use repositories::{connect_pool, PgShardRepository, PgUserRepository};
use routes::create_api_routes;
use store::{LocalEditorCache, LocalPresenceStore};
use websocket::handler::websocket_handler;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "shard_sync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    config::init_config(config.clone());

    // The repository is the only source of rooms and users; without a
    // database there is nothing to serve.
    let Some(db_url) = config.database_url.clone() else {
        error!("No database URL configured - cannot start");
        std::process::exit(1);
    };
    let pool = connect_pool(&db_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));

    if config.auth_jwt_secret.is_none() {
        warn!("No auth JWT secret configured - all connections will be rejected");
    }

    // Construct the shared coordination backends and the repository
    // adapters once, and inject them everywhere they are consumed.
    let presence = Arc::new(LocalPresenceStore::new());
    let cache = Arc::new(LocalEditorCache::new());
    let event_bus = Arc::new(LocalEventBus::new());
    let shards = Arc::new(PgShardRepository::new(pool.clone()));
    let users = Arc::new(PgUserRepository::new(pool));

    // Flush worker consuming depopulation-triggered persistence jobs
    let (flush_queue, outcomes) = jobs::spawn_flush_worker(cache.clone(), shards.clone());
    tokio::spawn(jobs::log_outcomes(outcomes));

    // The gateway instance for this process
    let gateway = Gateway::new(
        presence,
        cache,
        event_bus,
        shards,
        users,
        flush_queue,
        config.auth_jwt_secret.clone(),
    );
    gateway.spawn_bus_forwarders();

    // CORS restricted to the configured client origin
    let cors = match config
        .frontend_url
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        None => {
            warn!("No frontend URL configured - allowing any origin");
            CorsLayer::permissive()
        }
    };

    // Create API routes
    let api_routes = create_api_routes(gateway.clone());

    // WebSocket endpoint for client connections
    let ws_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(gateway);

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", api_routes)
        // Mount the WebSocket endpoint
        .merge(ws_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("Server running on http://{}", config.server_address());
    info!("WebSocket available at ws://{}/ws", config.server_address());
    info!(
        "Swagger UI available at http://{}/swagger",
        config.server_address()
    );

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
