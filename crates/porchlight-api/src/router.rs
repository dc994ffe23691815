use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{auth, requests, stream};

/// Assemble the application router. Reads and feeds are public; mutations
/// sit behind bearer auth.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/requests", get(requests::list_requests))
        .route("/requests/{id}", get(requests::get_request))
        .route("/stream/board", get(stream::stream_board))
        .route("/stream/requests/{id}", get(stream::stream_request));

    let protected = Router::new()
        .route("/requests", post(requests::create_request))
        .route("/requests/{id}/cancel", post(requests::cancel_request))
        .layer(middleware::from_fn(crate::middleware::require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
