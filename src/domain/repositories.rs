//! Repository abstractions over the persisted state.
//!
//! Every write carries `cycle_id` for forensic joins. Idempotency keys:
//! decisions are unique on `(cycle_id, agent_id)`, orders on `order_id` —
//! retrying a failed write never creates duplicates.

use crate::domain::types::{
    AccountSnapshot, AgentConfig, AgentDecision, AgentPerformance, BotState, Order, RejectedIntent,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Agent roster. The database is the runtime source of truth; the TOML sync
/// path only ever goes through `upsert`.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn active_agents(&self) -> Result<Vec<AgentConfig>>;
    async fn upsert(&self, agent: &AgentConfig) -> Result<()>;
}

#[async_trait]
pub trait DecisionRepository: Send + Sync {
    /// Insert a decision with its intents and rejections in one transaction.
    /// A duplicate `(cycle_id, agent_id)` is a no-op.
    async fn save(&self, decision: &AgentDecision, rejections: &[RejectedIntent]) -> Result<()>;

    async fn find_by_cycle(&self, cycle_id: i64) -> Result<Vec<AgentDecision>>;

    async fn count_for_cycle(&self, cycle_id: i64) -> Result<i64>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Upsert by `order_id`; called at every status transition.
    async fn save(&self, order: &Order) -> Result<()>;

    async fn find_by_decision(&self, decision_id: Uuid) -> Result<Vec<Order>>;

    async fn find_by_cycle(&self, cycle_id: i64) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait AccountSnapshotRepository: Send + Sync {
    async fn save(&self, snapshot: &AccountSnapshot) -> Result<()>;

    /// Most-recent snapshots, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<AccountSnapshot>>;

    /// The earliest snapshot on record (baseline for total-return figures).
    async fn first(&self) -> Result<Option<AccountSnapshot>>;
}

#[async_trait]
pub trait BotStateRepository: Send + Sync {
    async fn load(&self) -> Result<Option<BotState>>;
    async fn save(&self, state: &BotState) -> Result<()>;
}

#[async_trait]
pub trait PerformanceRepository: Send + Sync {
    async fn record_decision(&self, agent_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn record_orders(
        &self,
        agent_id: &str,
        placed: i64,
        filled: i64,
        realized_pnl_delta: Decimal,
    ) -> Result<()>;

    async fn load(&self, agent_id: &str) -> Result<Option<AgentPerformance>>;
}
