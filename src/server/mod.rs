pub mod error;
pub mod state;

use std::net::SocketAddr;

use axum::{
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use self::state::AppState;

/// Build the full axum router with all routes, middleware, and static file serving.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(health))
        .nest("/Gallery", crate::routes::gallery::router());

    // Serve generated thumbnails as static files
    let thumbnails_service = ServeDir::new(state.thumbnails_dir());

    // Prevent browsers from caching API responses (stale listings cause ghost images)
    let no_cache = SetResponseHeaderLayer::if_not_present(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );

    api.layer(no_cache)
        .nest_service("/thumbnails", thumbnails_service)
        .layer(cors)
        .with_state(state)
}

/// Start the axum HTTP server.
pub async fn start_server(state: AppState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.port()));
    log::info!("[Server] Starting axum server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
