use crate::domain::repositories::PerformanceRepository;
use crate::domain::types::AgentPerformance;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqlitePerformanceRepository {
    database: Database,
}

impl SqlitePerformanceRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl PerformanceRepository for SqlitePerformanceRepository {
    async fn record_decision(&self, agent_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_performance (agent_id, last_decision_at, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(agent_id) DO UPDATE SET
                last_decision_at = excluded.last_decision_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(agent_id)
        .bind(at.timestamp_millis())
        .bind(Utc::now().timestamp())
        .execute(&self.database.pool)
        .await
        .context("Failed to record decision time")?;

        Ok(())
    }

    async fn record_orders(
        &self,
        agent_id: &str,
        placed: i64,
        filled: i64,
        realized_pnl_delta: Decimal,
    ) -> Result<()> {
        // Read-modify-write on realized_pnl stays inside one statement; the
        // TEXT column forces the arithmetic into the application, so fetch
        // and update run in a transaction.
        let mut tx = self.database.pool.begin().await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT realized_pnl FROM agent_performance WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to read performance row")?;

        let current = existing
            .and_then(|(pnl,)| Decimal::from_str(&pnl).ok())
            .unwrap_or_default();
        let updated = current + realized_pnl_delta;

        sqlx::query(
            r#"
            INSERT INTO agent_performance (agent_id, orders_placed, orders_filled, realized_pnl, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(agent_id) DO UPDATE SET
                orders_placed = agent_performance.orders_placed + $2,
                orders_filled = agent_performance.orders_filled + $3,
                realized_pnl = $4,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(agent_id)
        .bind(placed)
        .bind(filled)
        .bind(updated.to_string())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to update performance row")?;

        tx.commit().await.context("Failed to commit performance update")?;
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<AgentPerformance>> {
        let row = sqlx::query_as::<_, (String, i64, i64, String, Option<i64>)>(
            r#"
            SELECT agent_id, orders_placed, orders_filled, realized_pnl, last_decision_at
            FROM agent_performance
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load performance row")?;

        Ok(row.map(
            |(agent_id, orders_placed, orders_filled, realized_pnl, last_decision_at)| {
                AgentPerformance {
                    agent_id,
                    orders_placed,
                    orders_filled,
                    realized_pnl: Decimal::from_str(&realized_pnl).unwrap_or_default(),
                    last_decision_at: last_decision_at
                        .and_then(DateTime::<Utc>::from_timestamp_millis),
                }
            },
        ))
    }
}
