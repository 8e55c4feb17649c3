use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Append-only metering row; written per tracked call, never mutated.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UsageRecord {
    pub endpoint: Option<String>,
    pub timestamp: OffsetDateTime,
}

impl UsageRecord {
    pub async fn insert(db: &PgPool, user_id: Uuid, endpoint: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage (user_id, endpoint)
            VALUES ($1, $2)
            "#,
        )
        .bind(user_id)
        .bind(endpoint)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn count_since(
        db: &PgPool,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM usage
            WHERE user_id = $1 AND timestamp > $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    pub async fn recent(
        db: &PgPool,
        user_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<UsageRecord>> {
        let rows = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT endpoint, timestamp
            FROM usage
            WHERE user_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}
