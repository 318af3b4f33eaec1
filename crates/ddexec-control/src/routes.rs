use axum::{
    Router,
    routing::{get, post},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::AppState;
use crate::handlers;
use crate::types::{ROUTE_CHECK_DEVICE, ROUTE_MKDIR, ROUTE_RUN_COMMAND};

/// Control-plane routes
pub fn control_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route(ROUTE_MKDIR, post(handlers::mkdir))
        .route(ROUTE_CHECK_DEVICE, post(handlers::check_device))
        .route(ROUTE_RUN_COMMAND, post(handlers::run_command))
}

/// Full application with tracing and panic recovery, ready to serve.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    control_routes()
        .layer(CatchPanicLayer::new())
        .layer(trace_layer)
        .with_state(state)
}
