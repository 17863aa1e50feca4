use crate::domain::repositories::DecisionRepository;
use crate::domain::types::{AgentDecision, ParseStatus, RejectedIntent, TradeIntent};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

pub struct SqliteDecisionRepository {
    database: Database,
}

impl SqliteDecisionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl DecisionRepository for SqliteDecisionRepository {
    /// Insert a decision with its intents and rejections. The
    /// `(cycle_id, agent_id)` uniqueness key makes a retried write a no-op
    /// rather than a duplicate.
    async fn save(&self, decision: &AgentDecision, rejections: &[RejectedIntent]) -> Result<()> {
        let actions_json =
            serde_json::to_string(&decision.actions).context("Failed to encode intents")?;
        let rejections_json =
            serde_json::to_string(rejections).context("Failed to encode rejections")?;

        sqlx::query(
            r#"
            INSERT INTO agent_decisions (
                decision_id,
                cycle_id,
                agent_id,
                created_at,
                model_used,
                prompt_fingerprint,
                raw_response,
                chain_of_thought,
                parse_status,
                actions_json,
                rejections_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(cycle_id, agent_id) DO NOTHING
            "#,
        )
        .bind(decision.decision_id.to_string())
        .bind(decision.cycle_id)
        .bind(&decision.agent_id)
        .bind(decision.created_at.timestamp_millis())
        .bind(&decision.model_used)
        .bind(&decision.prompt_fingerprint)
        .bind(&decision.raw_response)
        .bind(&decision.chain_of_thought)
        .bind(decision.parse_status.to_string())
        .bind(actions_json)
        .bind(rejections_json)
        .execute(&self.database.pool)
        .await
        .context("Failed to save decision")?;

        Ok(())
    }

    async fn find_by_cycle(&self, cycle_id: i64) -> Result<Vec<AgentDecision>> {
        let rows = sqlx::query_as::<
            _,
            (String, i64, String, i64, String, String, String, String, String, String),
        >(
            r#"
            SELECT
                decision_id,
                cycle_id,
                agent_id,
                created_at,
                model_used,
                prompt_fingerprint,
                raw_response,
                chain_of_thought,
                parse_status,
                actions_json
            FROM agent_decisions
            WHERE cycle_id = $1
            ORDER BY agent_id
            "#,
        )
        .bind(cycle_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load decisions for cycle")?;

        let mut decisions = Vec::with_capacity(rows.len());
        for (
            decision_id,
            cycle_id,
            agent_id,
            created_at,
            model_used,
            prompt_fingerprint,
            raw_response,
            chain_of_thought,
            parse_status,
            actions_json,
        ) in rows
        {
            let actions: Vec<TradeIntent> =
                serde_json::from_str(&actions_json).context("Corrupt intents payload")?;
            decisions.push(AgentDecision {
                decision_id: Uuid::from_str(&decision_id).context("Corrupt decision id")?,
                cycle_id,
                agent_id,
                created_at: DateTime::<Utc>::from_timestamp_millis(created_at)
                    .unwrap_or_else(Utc::now),
                model_used,
                prompt_fingerprint,
                raw_response,
                chain_of_thought,
                actions,
                parse_status: ParseStatus::from_str(&parse_status)
                    .unwrap_or(ParseStatus::Malformed),
            });
        }

        Ok(decisions)
    }

    async fn count_for_cycle(&self, cycle_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM agent_decisions WHERE cycle_id = $1")
                .bind(cycle_id)
                .fetch_one(&self.database.pool)
                .await
                .context("Failed to count decisions")?;
        Ok(count)
    }
}
