use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// The pool is the only shared mutable resource in the process. One writer
/// per pipeline phase plus the scheduler's bookkeeping never needs more
/// than this.
const POOL_MAX_CONNECTIONS: u32 = 5;

/// A locked file stalls a writer for at most this long before the write
/// surfaces as a cycle failure.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::prepare_storage_dir(db_url).await?;

        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("Invalid database URL: {}", db_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("Cannot open database at {}", db_url))?;

        let database = Self { pool };
        database.init().await?;

        info!(
            "Database ready at {} ({} pooled connections, WAL)",
            db_url, POOL_MAX_CONNECTIONS
        );
        Ok(database)
    }

    /// For file-backed URLs, make sure the parent directory exists before
    /// SQLite tries to create the file inside it.
    async fn prepare_storage_dir(db_url: &str) -> Result<()> {
        let Some(file_path) = db_url.strip_prefix("sqlite://") else {
            return Ok(());
        };
        match Path::new(file_path).parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
                fs::create_dir_all(dir).await.with_context(|| {
                    format!("Cannot create database directory {}", dir.display())
                })
            }
            _ => Ok(()),
        }
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_agents (
                agent_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                primary_model TEXT NOT NULL,
                fallback_model TEXT NOT NULL,
                max_leverage INTEGER NOT NULL,
                max_position_fraction TEXT NOT NULL,
                max_gross_exposure_fraction TEXT NOT NULL,
                stop_loss_required BOOLEAN NOT NULL DEFAULT 1,
                updated_at INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trading_agents table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_decisions (
                decision_id TEXT PRIMARY KEY,
                cycle_id INTEGER NOT NULL,
                agent_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                model_used TEXT NOT NULL,
                prompt_fingerprint TEXT NOT NULL,
                raw_response TEXT NOT NULL,
                chain_of_thought TEXT NOT NULL,
                parse_status TEXT NOT NULL,
                actions_json TEXT NOT NULL,
                rejections_json TEXT NOT NULL DEFAULT '[]',
                UNIQUE (cycle_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_cycle
            ON agent_decisions (cycle_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create agent_decisions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_trades (
                order_id TEXT PRIMARY KEY,
                decision_id TEXT NOT NULL,
                cycle_id INTEGER NOT NULL,
                coin TEXT NOT NULL,
                side TEXT NOT NULL,
                intended_size TEXT NOT NULL,
                filled_size TEXT NOT NULL,
                limit_price TEXT,
                leverage INTEGER NOT NULL,
                reduce_only BOOLEAN NOT NULL DEFAULT 0,
                client_order_id TEXT NOT NULL,
                exchange_order_id INTEGER,
                status TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                finalized_at INTEGER,
                error_code TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_cycle
            ON agent_trades (cycle_id);
            CREATE INDEX IF NOT EXISTS idx_trades_decision
            ON agent_trades (decision_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create agent_trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_performance (
                agent_id TEXT PRIMARY KEY,
                orders_placed INTEGER NOT NULL DEFAULT 0,
                orders_filled INTEGER NOT NULL DEFAULT 0,
                realized_pnl TEXT NOT NULL DEFAULT '0',
                last_decision_at INTEGER,
                updated_at INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create agent_performance table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_snapshots (
                cycle_id INTEGER PRIMARY KEY,
                captured_at INTEGER NOT NULL,
                equity TEXT NOT NULL,
                free_cash TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                gross_exposure TEXT NOT NULL,
                realized_pnl_total TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                service_start_time INTEGER NOT NULL,
                cycle_count INTEGER NOT NULL DEFAULT 0,
                last_cycle_at INTEGER,
                last_cycle_status TEXT,
                last_error TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create bot_state table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
