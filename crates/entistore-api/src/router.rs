//! HTTP router construction.

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::handler;
use crate::state::AppState;

/// Build the HTTP router for the configured collection.
///
/// Every route except `/favicon.ico` answers 503 while storage is not
/// connected, unknown paths included.
pub fn build_router(state: AppState) -> Router {
    let collection = state.config.collection_path();
    let item = state.config.item_path();

    let gated = Router::new()
        .route("/", get(handler::service_info))
        .route(
            &collection,
            get(handler::list_entities).post(handler::create_entity),
        )
        .route(
            &item,
            get(handler::get_entity)
                .patch(handler::update_entity)
                .delete(handler::delete_entity),
        )
        .fallback(handler::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_storage));

    Router::new()
        .route("/favicon.ico", get(handler::favicon))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_storage(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.db.is_ready() {
        return ApiError::Unavailable.into_response();
    }
    next.run(request).await
}
