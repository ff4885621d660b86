//! crema-api: JSON and server-sent events over the session cache.

pub mod handlers;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/games", get(handlers::handle_games))
        .route("/games/{id}", get(handlers::handle_game))
        .route("/updates", get(handlers::handle_updates))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Bind `listen` and serve until the task is dropped.
pub async fn serve(state: ApiState, listen: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind API listener on {listen}"))?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
