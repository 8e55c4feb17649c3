use axum::{
    routing::post,
    Router,
};

use crate::state::AppState;

pub mod handlers;
pub mod provider;
pub mod signature;

pub use provider::{BillingProvider, DisabledBilling, StripeClient};

pub const WEBHOOK_PATH: &str = "/webhook/stripe";

/// Billing routes under `/api` (authenticated, rate limited).
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(handlers::checkout))
        .route("/billing-portal", post(handlers::billing_portal))
}

/// The provider-facing webhook, mounted at the root (signature-verified,
/// CSRF-exempt).
pub fn webhook_router() -> Router<AppState> {
    Router::new().route(WEBHOOK_PATH, post(handlers::stripe_webhook))
}
