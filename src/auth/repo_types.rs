use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub plan: String,
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>, // single-use credential, not exposed in JSON
    pub reset_token_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}
