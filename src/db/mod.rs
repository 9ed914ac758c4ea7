//! SQLite persistence.
//!
//! Stores what must survive a restart:
//! - Pair lifecycle state (currently open and blacklisted pairs)
//! - The signal journal, one row per handled signal

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::Signal;
use crate::trading::{PersistedPairState, BLACKLIST_KEY, CURRENTLY_OPEN_KEY};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Journal entry for one handled signal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSignal {
    pub id: String,
    pub pair: String,
    pub action: String,
    pub side: String,
    pub size: i64,
    pub open_price: String,
    pub outcome: String,
    pub error_message: Option<String>,
    pub fatal: bool,
    pub received_at: String,
    pub handled_at: String,
}

/// Number of journal entries with a given outcome.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OutcomeCount {
    pub outcome: String,
    pub count: i64,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` is its own database.
        let in_memory = database_url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Pair state, key-value
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pair_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Signal journal
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_log (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                action TEXT NOT NULL,
                side TEXT NOT NULL,
                size INTEGER NOT NULL,
                open_price TEXT NOT NULL,
                outcome TEXT NOT NULL,
                error_message TEXT,
                fatal INTEGER NOT NULL DEFAULT 0,
                received_at TEXT NOT NULL,
                handled_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signal_log_pair ON signal_log(pair)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Pair State ====================

    /// Read both persisted sets. Missing keys read as empty.
    pub async fn load_pair_state(&self) -> Result<PersistedPairState> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM pair_state")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read pair state")?;

        let mut state = PersistedPairState::default();
        for (key, value) in rows {
            match key.as_str() {
                CURRENTLY_OPEN_KEY => state.currently_open = value,
                BLACKLIST_KEY => state.blacklist = value,
                _ => {}
            }
        }
        Ok(state)
    }

    /// Write both sets atomically.
    pub async fn save_pair_state(&self, state: &PersistedPairState) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for (key, value) in [
            (CURRENTLY_OPEN_KEY, &state.currently_open),
            (BLACKLIST_KEY, &state.blacklist),
        ] {
            sqlx::query(
                r#"
                INSERT INTO pair_state (key, value, updated_at)
                VALUES (?, ?, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to write {}", key))?;
        }

        tx.commit().await.context("Failed to commit pair state")?;
        Ok(())
    }

    // ==================== Signal Journal ====================

    /// Append a handled signal; returns the journal id.
    pub async fn record_signal(
        &self,
        signal: &Signal,
        outcome: &str,
        error: Option<&str>,
        fatal: bool,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO signal_log (
                id, pair, action, side, size, open_price, outcome, error_message, fatal, received_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(signal.pair.as_str())
        .bind(signal.action.as_str())
        .bind(signal.side.as_str())
        .bind(i64::from(signal.size))
        .bind(signal.open_price.to_string())
        .bind(outcome)
        .bind(error)
        .bind(fatal)
        .bind(signal.received_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record signal")?;

        Ok(id)
    }

    /// Most recent journal entries, newest first.
    pub async fn get_recent_signals(&self, limit: i64) -> Result<Vec<StoredSignal>> {
        sqlx::query_as::<_, StoredSignal>(
            "SELECT * FROM signal_log ORDER BY handled_at DESC, received_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch signal journal")
    }

    /// Journal totals per outcome.
    pub async fn get_signal_stats(&self) -> Result<Vec<OutcomeCount>> {
        sqlx::query_as::<_, OutcomeCount>(
            "SELECT outcome, COUNT(*) AS count FROM signal_log GROUP BY outcome ORDER BY count DESC, outcome",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch signal stats")
    }
}
