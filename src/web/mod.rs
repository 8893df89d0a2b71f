//! Web server for the relay.
//!
//! Wires the entry pages, the `/proxy` relay endpoint and the `/api`
//! session/config endpoints into one axum router, CORS open.

pub mod routes;
pub mod views;

use std::sync::Arc;

use axum::extract::Extension;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::AppState;

/// Build the complete axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/browse", get(routes::browse_get).post(routes::browse_post))
        .route("/proxy", get(routes::proxy).post(routes::proxy))
        .nest("/api", routes::api_router())
        .layer(cors)
        .layer(Extension(state))
}

/// Start the web server on the given port.
pub async fn start_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Relay listening on http://0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
