use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::billing::signature::verify_signature;

#[derive(Debug, Clone)]
pub struct CheckoutParams {
    pub user_id: Uuid,
    pub email: String,
    pub price_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

/// A provider event, verified and decoded from the webhook payload. The
/// object payload stays dynamic; the webhook handler digs out the fields it
/// needs per event type.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_checkout_session(&self, params: CheckoutParams)
        -> anyhow::Result<CheckoutSession>;
    async fn create_portal_session(&self, customer_id: &str) -> anyhow::Result<PortalSession>;
    fn construct_event(&self, payload: &[u8], signature: &str) -> anyhow::Result<WebhookEvent>;
}

/// Stripe REST client. Calls are form-encoded against the v1 API; webhook
/// payloads are authenticated with the endpoint secret.
pub struct StripeClient {
    secret_key: String,
    webhook_secret: String,
    return_url: String,
    api_base: String,
    http: reqwest::Client,
}

impl StripeClient {
    pub fn new(secret_key: String, webhook_secret: String, return_url: String) -> Self {
        Self {
            secret_key,
            webhook_secret,
            return_url,
            api_base: "https://api.stripe.com".into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        params: CheckoutParams,
    ) -> anyhow::Result<CheckoutSession> {
        let user_id = params.user_id.to_string();
        let success_url = format!("{}/dashboard?checkout=success", self.return_url);
        let cancel_url = format!("{}/dashboard?checkout=cancel", self.return_url);
        let form = [
            ("mode", "subscription"),
            ("line_items[0][price]", params.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("customer_email", params.email.as_str()),
            ("metadata[userId]", user_id.as_str()),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];

        let session = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<CheckoutSession>()
            .await
            .context("decode checkout session")?;
        Ok(session)
    }

    async fn create_portal_session(&self, customer_id: &str) -> anyhow::Result<PortalSession> {
        let form = [
            ("customer", customer_id),
            ("return_url", self.return_url.as_str()),
        ];

        let session = self
            .http
            .post(format!("{}/v1/billing_portal/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<PortalSession>()
            .await
            .context("decode portal session")?;
        Ok(session)
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> anyhow::Result<WebhookEvent> {
        verify_signature(payload, signature, &self.webhook_secret)?;
        let event = serde_json::from_slice(payload).context("decode webhook event")?;
        Ok(event)
    }
}

/// Placeholder when no provider keys are configured: every call fails
/// cleanly instead of reaching out.
pub struct DisabledBilling;

#[async_trait]
impl BillingProvider for DisabledBilling {
    async fn create_checkout_session(
        &self,
        _params: CheckoutParams,
    ) -> anyhow::Result<CheckoutSession> {
        bail!("payments are not configured")
    }

    async fn create_portal_session(&self, _customer_id: &str) -> anyhow::Result<PortalSession> {
        bail!("payments are not configured")
    }

    fn construct_event(&self, _payload: &[u8], _signature: &str) -> anyhow::Result<WebhookEvent> {
        bail!("payments are not configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_event_decodes_type_and_object() {
        let payload = r#"{
            "type": "checkout.session.completed",
            "data": { "object": { "customer": "cus_123", "metadata": { "userId": "1" } } }
        }"#;
        let event: WebhookEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.kind, "checkout.session.completed");
        assert_eq!(event.data.object["customer"], "cus_123");
    }

    #[tokio::test]
    async fn disabled_billing_fails_cleanly() {
        let err = DisabledBilling
            .create_portal_session("cus_123")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
