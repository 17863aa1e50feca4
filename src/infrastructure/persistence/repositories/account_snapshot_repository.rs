use crate::domain::repositories::AccountSnapshotRepository;
use crate::domain::types::AccountSnapshot;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteAccountSnapshotRepository {
    database: Database,
}

impl SqliteAccountSnapshotRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

type SnapshotRow = (i64, i64, String, String, String, String, String);

fn row_to_snapshot(row: SnapshotRow) -> AccountSnapshot {
    let (cycle_id, captured_at, equity, free_cash, unrealized_pnl, gross_exposure, realized) = row;
    AccountSnapshot {
        cycle_id,
        captured_at: DateTime::<Utc>::from_timestamp_millis(captured_at).unwrap_or_else(Utc::now),
        equity: Decimal::from_str(&equity).unwrap_or_default(),
        free_cash: Decimal::from_str(&free_cash).unwrap_or_default(),
        unrealized_pnl: Decimal::from_str(&unrealized_pnl).unwrap_or_default(),
        gross_exposure: Decimal::from_str(&gross_exposure).unwrap_or_default(),
        realized_pnl_total: Decimal::from_str(&realized).unwrap_or_default(),
    }
}

#[async_trait]
impl AccountSnapshotRepository for SqliteAccountSnapshotRepository {
    async fn save(&self, snapshot: &AccountSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_snapshots (
                cycle_id, captured_at, equity, free_cash,
                unrealized_pnl, gross_exposure, realized_pnl_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(cycle_id) DO UPDATE SET
                captured_at = excluded.captured_at,
                equity = excluded.equity,
                free_cash = excluded.free_cash,
                unrealized_pnl = excluded.unrealized_pnl,
                gross_exposure = excluded.gross_exposure,
                realized_pnl_total = excluded.realized_pnl_total
            "#,
        )
        .bind(snapshot.cycle_id)
        .bind(snapshot.captured_at.timestamp_millis())
        .bind(snapshot.equity.to_string())
        .bind(snapshot.free_cash.to_string())
        .bind(snapshot.unrealized_pnl.to_string())
        .bind(snapshot.gross_exposure.to_string())
        .bind(snapshot.realized_pnl_total.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to save account snapshot")?;

        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AccountSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT cycle_id, captured_at, equity, free_cash,
                   unrealized_pnl, gross_exposure, realized_pnl_total
            FROM account_snapshots
            ORDER BY cycle_id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent snapshots")?;

        Ok(rows.into_iter().map(row_to_snapshot).collect())
    }

    async fn first(&self) -> Result<Option<AccountSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT cycle_id, captured_at, equity, free_cash,
                   unrealized_pnl, gross_exposure, realized_pnl_total
            FROM account_snapshots
            ORDER BY cycle_id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load first snapshot")?;

        Ok(row.map(row_to_snapshot))
    }
}
