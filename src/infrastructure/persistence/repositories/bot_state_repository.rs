use crate::domain::repositories::BotStateRepository;
use crate::domain::types::{BotState, CycleStatus};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;

pub struct SqliteBotStateRepository {
    database: Database,
}

impl SqliteBotStateRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl BotStateRepository for SqliteBotStateRepository {
    async fn load(&self) -> Result<Option<BotState>> {
        let row = sqlx::query_as::<_, (i64, i64, Option<i64>, Option<String>, Option<String>)>(
            r#"
            SELECT service_start_time, cycle_count, last_cycle_at, last_cycle_status, last_error
            FROM bot_state
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load bot state")?;

        Ok(row.map(
            |(service_start_time, cycle_count, last_cycle_at, last_cycle_status, last_error)| {
                BotState {
                    service_start_time: DateTime::<Utc>::from_timestamp_millis(service_start_time)
                        .unwrap_or_else(Utc::now),
                    cycle_count,
                    last_cycle_at: last_cycle_at.and_then(DateTime::<Utc>::from_timestamp_millis),
                    last_cycle_status: last_cycle_status
                        .and_then(|s| CycleStatus::from_str(&s).ok()),
                    last_error,
                }
            },
        ))
    }

    async fn save(&self, state: &BotState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (
                id, service_start_time, cycle_count, last_cycle_at, last_cycle_status, last_error
            )
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT(id) DO UPDATE SET
                service_start_time = excluded.service_start_time,
                cycle_count = excluded.cycle_count,
                last_cycle_at = excluded.last_cycle_at,
                last_cycle_status = excluded.last_cycle_status,
                last_error = excluded.last_error
            "#,
        )
        .bind(state.service_start_time.timestamp_millis())
        .bind(state.cycle_count)
        .bind(state.last_cycle_at.map(|t| t.timestamp_millis()))
        .bind(state.last_cycle_status.map(|s| s.to_string()))
        .bind(&state.last_error)
        .execute(&self.database.pool)
        .await
        .context("Failed to save bot state")?;

        Ok(())
    }
}
