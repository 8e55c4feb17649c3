use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

mod dto;
pub mod handlers;
pub mod repo;

/// Routes nested under `/api`: rate limited, identity required.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(handlers::dashboard))
        .route("/track", post(handlers::track))
        .merge(crate::billing::api_router())
}
