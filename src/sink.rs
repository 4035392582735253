use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::types::ScoredEvent;

/// Downstream consumer of scored acquisition cycles. Sinks are invoked
/// fire-and-forget after each cycle; a failing sink is logged by the caller
/// and never blocks or fails the broadcast path.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: ScoredEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// PostgreSQL persistence for scored events
pub struct PostgresEventSink {
    pool: PgPool,
}

impl PostgresEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scored_events (
                id BIGSERIAL PRIMARY KEY,
                recorded_at TIMESTAMPTZ NOT NULL,
                mode TEXT NOT NULL,
                user_id TEXT NOT NULL,
                context JSONB NOT NULL,
                alpha DOUBLE PRECISION NOT NULL,
                beta DOUBLE PRECISION NOT NULL,
                theta DOUBLE PRECISION NOT NULL,
                gamma DOUBLE PRECISION NOT NULL,
                scores JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_scored_events_user
                ON scored_events(user_id, recorded_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventSink for PostgresEventSink {
    async fn record(&self, event: ScoredEvent) -> Result<()> {
        let scores = serde_json::to_value(event.features.scores)?;
        sqlx::query(
            r#"
            INSERT INTO scored_events
                (recorded_at, mode, user_id, context, alpha, beta, theta, gamma, scores)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.timestamp)
        .bind(&event.mode)
        .bind(&event.user_id)
        .bind(&event.context)
        .bind(event.features.bands.alpha)
        .bind(event.features.bands.beta)
        .bind(event.features.bands.theta)
        .bind(event.features.bands.gamma)
        .bind(scores)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Best-effort mirror of scored events to a remote collector. The short
/// timeout keeps a slow endpoint from piling up in-flight requests.
pub struct CloudEventSink {
    client: reqwest::Client,
    endpoint: String,
}

impl CloudEventSink {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl EventSink for CloudEventSink {
    async fn record(&self, event: ScoredEvent) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cloud-sync"
    }
}
