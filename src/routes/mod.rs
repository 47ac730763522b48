pub mod api;
pub mod talk;

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// Combine every route into the application router
pub fn app(state: Arc<AppState>) -> Router {
    api::create_api_router()
        .merge(talk::create_talk_router())
        .with_state(state)
}
