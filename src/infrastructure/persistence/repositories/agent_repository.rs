use crate::domain::repositories::AgentRepository;
use crate::domain::types::{AgentConfig, RiskProfile};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteAgentRepository {
    database: Database,
}

impl SqliteAgentRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn active_agents(&self) -> Result<Vec<AgentConfig>> {
        let rows = sqlx::query_as::<_, (String, String, bool, String, String, i64, String, String, bool)>(
            r#"
            SELECT
                agent_id,
                display_name,
                is_active,
                primary_model,
                fallback_model,
                max_leverage,
                max_position_fraction,
                max_gross_exposure_fraction,
                stop_loss_required
            FROM trading_agents
            WHERE is_active = 1
            ORDER BY agent_id
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load active agents")?;

        let agents = rows
            .into_iter()
            .map(
                |(
                    agent_id,
                    display_name,
                    is_active,
                    primary_model,
                    fallback_model,
                    max_leverage,
                    max_position,
                    max_gross,
                    stop_loss_required,
                )| AgentConfig {
                    agent_id,
                    display_name,
                    is_active,
                    primary_model,
                    fallback_model,
                    risk_profile: RiskProfile {
                        max_leverage: max_leverage as u32,
                        max_position_fraction: Decimal::from_str(&max_position)
                            .unwrap_or_default(),
                        max_gross_exposure_fraction: Decimal::from_str(&max_gross)
                            .unwrap_or_default(),
                        stop_loss_required,
                    },
                },
            )
            .collect();

        Ok(agents)
    }

    async fn upsert(&self, agent: &AgentConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_agents (
                agent_id,
                display_name,
                is_active,
                primary_model,
                fallback_model,
                max_leverage,
                max_position_fraction,
                max_gross_exposure_fraction,
                stop_loss_required,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(agent_id) DO UPDATE SET
                display_name = excluded.display_name,
                is_active = excluded.is_active,
                primary_model = excluded.primary_model,
                fallback_model = excluded.fallback_model,
                max_leverage = excluded.max_leverage,
                max_position_fraction = excluded.max_position_fraction,
                max_gross_exposure_fraction = excluded.max_gross_exposure_fraction,
                stop_loss_required = excluded.stop_loss_required,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&agent.agent_id)
        .bind(&agent.display_name)
        .bind(agent.is_active)
        .bind(&agent.primary_model)
        .bind(&agent.fallback_model)
        .bind(agent.risk_profile.max_leverage as i64)
        .bind(agent.risk_profile.max_position_fraction.to_string())
        .bind(agent.risk_profile.max_gross_exposure_fraction.to_string())
        .bind(agent.risk_profile.stop_loss_required)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert agent")?;

        Ok(())
    }
}
