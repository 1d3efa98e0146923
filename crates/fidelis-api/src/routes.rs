use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::{
    routing::{delete, get, post},
    BoxError, Router,
};
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower::load_shed::LoadShedLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

async fn handle_middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else if err.is::<tower::load_shed::error::Overloaded>() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "server overloaded".to_string(),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "middleware failure".to_string(),
        )
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/validate", post(handlers::submit_validation))
        .route("/api/validate", get(handlers::list_sessions))
        .route("/api/validate/hybrid", post(handlers::submit_hybrid))
        .route("/api/behavioral/validate", post(handlers::submit_behavioral))
        .route("/api/validate/:request_id/status", get(handlers::get_status))
        .route("/api/validate/:request_id/result", get(handlers::get_result))
        .route("/api/validate/:request_id/report", get(handlers::get_report))
        .route("/api/validate/:request_id/logs", get(handlers::get_logs))
        .route(
            "/api/validate/:request_id/events",
            get(handlers::progress_events),
        )
        .route("/api/validate/:request_id", delete(handlers::cancel_or_delete))
        .route("/api/technologies", get(handlers::technologies))
        .route("/api/compatibility", post(handlers::compatibility))
        .route("/api/queue/stats", get(handlers::queue_stats))
        .route("/health", get(handlers::health))
        .with_state(state)
        // Outermost first: tracing wraps everything; load shedding and
        // timeouts sit in front of the handlers.
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods(tower_http::cors::Any)
                        .allow_headers(tower_http::cors::Any),
                )
                .layer(CompressionLayer::new())
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(LoadShedLayer::new())
                .layer(ConcurrencyLimitLayer::new(512))
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState, host: &str, port: u16) -> fidelis_core::Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(fidelis_core::FidelisError::Io)?;
    tracing::info!(addr, "fidelis api listening");
    axum::serve(listener, router)
        .await
        .map_err(fidelis_core::FidelisError::Io)?;
    Ok(())
}
