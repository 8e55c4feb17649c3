use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::extractors::CurrentUser;
use crate::auth::repo_types::User;
use crate::billing::provider::{CheckoutParams, WebhookEvent};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(rename = "priceId")]
    pub price_id: String,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub url: String,
}

#[instrument(skip(state))]
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<RedirectResponse>, ApiError> {
    let user = User::find_by_id(&state.db, identity.user_id())
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let session = state
        .billing
        .create_checkout_session(CheckoutParams {
            user_id: user.id,
            email: user.email,
            price_id: payload.price_id,
        })
        .await
        .map_err(ApiError::Internal)?;

    info!(user_id = %identity.user_id(), "checkout session created");
    Ok(Json(RedirectResponse { url: session.url }))
}

#[instrument(skip(state))]
pub async fn billing_portal(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<RedirectResponse>, ApiError> {
    let user = User::find_by_id(&state.db, identity.user_id())
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let customer_id = user
        .stripe_customer_id
        .ok_or_else(|| ApiError::Validation("No billing account found".into()))?;

    let session = state
        .billing
        .create_portal_session(&customer_id)
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(RedirectResponse { url: session.url }))
}

/// Provider webhook: raw body, signature header, no session. Unverifiable
/// payloads are a 400; store failures while applying a verified event are
/// internal.
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("Missing Stripe-Signature header".into()))?;

    let event = state.billing.construct_event(&body, signature).map_err(|e| {
        warn!(error = %e, "webhook rejected");
        ApiError::Validation(format!("Webhook Error: {e}"))
    })?;

    apply_event(&state.db, &event)
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({ "received": true })))
}

async fn apply_event(db: &PgPool, event: &WebhookEvent) -> anyhow::Result<()> {
    let object = &event.data.object;
    match event.kind.as_str() {
        "checkout.session.completed" => {
            if let Some((user_id, customer)) = checkout_completed_ids(object) {
                User::update_stripe_customer_id(db, user_id, &customer).await?;
                info!(%user_id, "stripe customer attached");
            } else {
                warn!("checkout.session.completed without usable metadata");
            }
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            if let Some(customer) = customer_id(object) {
                let plan = plan_from_subscription(object);
                User::update_plan(db, &customer, &plan).await?;
                info!(%customer, %plan, "subscription plan updated");
            }
        }
        "customer.subscription.deleted" => {
            if let Some(customer) = customer_id(object) {
                User::update_plan(db, &customer, "free").await?;
                info!(%customer, "subscription ended, plan reset to free");
            }
        }
        other => debug!(kind = %other, "ignoring webhook event"),
    }
    Ok(())
}

fn customer_id(object: &serde_json::Value) -> Option<String> {
    object.get("customer")?.as_str().map(str::to_string)
}

fn checkout_completed_ids(object: &serde_json::Value) -> Option<(Uuid, String)> {
    let user_id = object
        .get("metadata")?
        .get("userId")?
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())?;
    let customer = customer_id(object)?;
    Some((user_id, customer))
}

/// Plan tag from the subscription's first price nickname, defaulting to
/// "pro" when the nickname is absent.
fn plan_from_subscription(object: &serde_json::Value) -> String {
    object
        .get("items")
        .and_then(|items| items.get("data")?.get(0)?.get("price")?.get("nickname"))
        .and_then(|v| v.as_str())
        .unwrap_or("pro")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_ids_require_valid_uuid_metadata() {
        let uuid = Uuid::new_v4();
        let object = json!({
            "customer": "cus_123",
            "metadata": { "userId": uuid.to_string() }
        });
        let (user_id, customer) = checkout_completed_ids(&object).unwrap();
        assert_eq!(user_id, uuid);
        assert_eq!(customer, "cus_123");

        let object = json!({ "customer": "cus_123", "metadata": { "userId": "1" } });
        assert!(checkout_completed_ids(&object).is_none());
    }

    #[test]
    fn plan_comes_from_the_price_nickname() {
        let object = json!({
            "customer": "cus_123",
            "items": { "data": [ { "price": { "nickname": "Pro Annual" } } ] }
        });
        assert_eq!(plan_from_subscription(&object), "Pro Annual");
    }

    #[test]
    fn plan_defaults_to_pro_without_a_nickname() {
        let object = json!({ "customer": "cus_123", "items": { "data": [] } });
        assert_eq!(plan_from_subscription(&object), "pro");

        let object = json!({ "customer": "cus_123" });
        assert_eq!(plan_from_subscription(&object), "pro");
    }
}
