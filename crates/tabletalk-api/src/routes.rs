//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tabletalk_core::TabletalkError;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Allow the configured port plus port+1 for a dev front-end.
    let port = state.config.general.port;
    let dev_port = port.saturating_add(1);
    let origins: Vec<HeaderValue> = [port, dev_port]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/capabilities", get(handlers::list_capabilities))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{id}", delete(handlers::close_session))
        .route("/sessions/{id}/history", get(handlers::session_history))
        .route("/sessions/{id}/requests", post(handlers::submit_request))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB global limit
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the configured bind address until `shutdown` resolves.
///
/// The dispatcher is shut down once the server stops accepting
/// connections, so queued requests receive `SessionClosed`.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), TabletalkError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!(
        "{}:{}",
        state.config.general.bind_address, state.config.general.port
    );
    let dispatcher = state.dispatcher.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TabletalkError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "API server listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received, closing sessions");
            dispatcher.shutdown();
        })
        .await;

    result.map_err(|e| TabletalkError::Api(format!("Server error: {}", e)))
}
