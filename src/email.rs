use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { id: String },
    Disabled,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, msg: &EmailMessage) -> anyhow::Result<Delivery>;
}

/// Brevo-shaped HTTP mailer.
pub struct HttpMailer {
    api_key: String,
    from_address: String,
    endpoint: String,
    http: reqwest::Client,
}

impl HttpMailer {
    pub fn new(api_key: String, from_address: String) -> Self {
        Self {
            api_key,
            from_address,
            endpoint: "https://api.brevo.com/v3/smtp/email".into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, msg: &EmailMessage) -> anyhow::Result<Delivery> {
        let res = self
            .http
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .json(&json!({
                "sender": { "email": self.from_address },
                "to": [{ "email": msg.to }],
                "subject": msg.subject,
                "htmlContent": msg.html,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = res.json().await?;
        let id = body
            .get("messageId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Delivery::Sent { id })
    }
}

/// No-op mailer used when no provider key is configured.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, msg: &EmailMessage) -> anyhow::Result<Delivery> {
        debug!(to = %msg.to, subject = %msg.subject, "email delivery disabled, dropping message");
        Ok(Delivery::Disabled)
    }
}

/// Fire-and-forget send: the caller's response path never waits on delivery,
/// and failures end up in the log, not in a response.
pub fn send_detached(mailer: Arc<dyn Mailer>, msg: EmailMessage) {
    tokio::spawn(async move {
        match mailer.send(&msg).await {
            Ok(Delivery::Sent { id }) => {
                info!(to = %msg.to, message_id = %id, "email sent")
            }
            Ok(Delivery::Disabled) => {}
            Err(e) => error!(error = %e, to = %msg.to, "email send failed"),
        }
    });
}

pub fn welcome_email(to: &str, name: Option<&str>) -> EmailMessage {
    let greeting = match name {
        Some(name) => format!("Welcome, {name}!"),
        None => "Welcome!".to_string(),
    };
    EmailMessage {
        to: to.to_string(),
        subject: "Welcome to Stackbase".into(),
        html: format!(
            "<h1>{greeting}</h1>\
             <p>Your account is ready. Your API key is shown once on your dashboard.</p>"
        ),
    }
}

pub fn reset_email(to: &str, base_url: &str, token: &str) -> EmailMessage {
    let link = format!("{base_url}/reset-password?token={token}");
    EmailMessage {
        to: to.to_string(),
        subject: "Reset your password".into(),
        html: format!(
            "<p>We received a request to reset your password.</p>\
             <p><a href=\"{link}\">Choose a new password</a></p>\
             <p>This link expires in one hour. If you did not ask for a reset, ignore this email.</p>"
        ),
    }
}
