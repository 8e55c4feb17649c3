use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Store-level failure. Unique violations carry the constraint name so
/// callers can tell an email conflict from a token collision.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Unique(String),
    #[error(transparent)]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    pub fn violates(&self, column: &str) -> bool {
        matches!(self, StoreError::Unique(c) if c.contains(column))
    }
}

fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return StoreError::Unique(db.constraint().unwrap_or_default().to_string());
        }
    }
    StoreError::Other(e)
}

impl User {
    /// Insert a new user. Email and api_key uniqueness are enforced by the
    /// database; violations surface as `StoreError::Unique`.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        name: Option<&str>,
        api_key: &str,
    ) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, api_key)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, name, api_key, plan,
                      stripe_customer_id, reset_token, reset_token_expires, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(api_key)
        .fetch_one(db)
        .await
        .map_err(classify)?;
        Ok(user)
    }

    /// Find a user by email. Exact match; emails are normalized before they
    /// reach the store.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, api_key, plan,
                   stripe_customer_id, reset_token, reset_token_expires, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, api_key, plan,
                   stripe_customer_id, reset_token, reset_token_expires, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_api_key(db: &PgPool, api_key: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, api_key, plan,
                   stripe_customer_id, reset_token, reset_token_expires, created_at
            FROM users
            WHERE api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Arm the password-reset state: one active token per user, replacing any
    /// previous one.
    pub async fn set_reset_token(
        db: &PgPool,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token = $2, reset_token_expires = $3
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(db)
        .await
        .map_err(classify)?;
        Ok(())
    }

    /// Match a reset token that has not expired yet. Wrong, consumed and
    /// expired tokens all come back as `None`.
    pub async fn find_by_valid_reset_token(
        db: &PgPool,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, api_key, plan,
                   stripe_customer_id, reset_token, reset_token_expires, created_at
            FROM users
            WHERE reset_token = $1 AND reset_token_expires > $2
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Replace the password hash and clear the reset state in one statement.
    /// The token guard in the WHERE clause makes concurrent consumption
    /// single-winner; returns whether this caller won.
    pub async fn consume_reset_token(
        db: &PgPool,
        user_id: Uuid,
        token: &str,
        new_password_hash: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, reset_token = NULL, reset_token_expires = NULL
            WHERE id = $1 AND reset_token = $3
            "#,
        )
        .bind(user_id)
        .bind(new_password_hash)
        .bind(token)
        .execute(db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Billing collaborator write: plan by stripe customer.
    pub async fn update_plan(
        db: &PgPool,
        stripe_customer_id: &str,
        plan: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET plan = $2
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(stripe_customer_id)
        .bind(plan)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Billing collaborator write: attach a stripe customer to a user.
    pub async fn update_stripe_customer_id(
        db: &PgPool,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET stripe_customer_id = $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(stripe_customer_id)
        .execute(db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violates_matches_constraint_name() {
        let err = StoreError::Unique("users_email_key".into());
        assert!(err.violates("email"));
        assert!(!err.violates("api_key"));

        let err = StoreError::Unique("users_api_key_key".into());
        assert!(err.violates("api_key"));
    }

    #[test]
    fn non_unique_errors_never_match() {
        let err = StoreError::Other(sqlx::Error::RowNotFound);
        assert!(!err.violates("email"));
    }
}
