//! PostgreSQL checkpoint store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::agent::state::AgentState;
use crate::config::DatabaseConfig;
use crate::error::Result;

use super::{CheckpointStore, SessionInfo};

/// Initialize the PostgreSQL connection pool
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(config.url.expose_secret())
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    info!("PostgreSQL connection pool initialized successfully");
    Ok(pool)
}

/// Database migrations
pub mod migrations {
    use super::*;

    /// Run all migrations (idempotent)
    pub async fn run(pool: &PgPool) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                status TEXT NOT NULL DEFAULT 'active'
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY REFERENCES sessions(session_id) ON DELETE CASCADE,
                state JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)")
            .execute(pool)
            .await?;

        info!("Database migrations completed");
        Ok(())
    }
}

/// Checkpoint store backed by PostgreSQL.
///
/// The checkpoint upsert gives last-writer-wins semantics per session id;
/// no cross-session ordering is guaranteed or needed.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresCheckpointStore { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    user_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: String,
}

impl From<SessionRow> for SessionInfo {
    fn from(row: SessionRow) -> Self {
        SessionInfo {
            session_id: row.session_id,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            status: row.status,
        }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn create_session(
        &self,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // ON CONFLICT keeps the original row, making creation idempotent
        // on the session id.
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO NOTHING
        "#,
        )
        .bind(&id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn session_info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, user_id, created_at, updated_at, status FROM sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionInfo::from))
    }

    async fn get(&self, session_id: &str) -> Result<Option<AgentState>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT state FROM checkpoints WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session_id: &str, state: &AgentState) -> Result<()> {
        let value = serde_json::to_value(state)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (session_id, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
        "#,
        )
        .bind(session_id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET updated_at = NOW() WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
