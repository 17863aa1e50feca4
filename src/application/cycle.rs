//! One cycle of the decision-and-execution pipeline.
//!
//! Phase order is fixed: collect → agents (parallel, joined) → validate →
//! risk gate → persist decisions → execute → reconcile → snapshot. Decisions
//! are always persisted before the first order goes out, so a crash between
//! the two leaves an auditable record and no phantom trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::collector::DataCollector;
use crate::application::executor::Executor;
use crate::application::orchestrator::{AgentJob, AgentOrchestrator};
use crate::application::prompt::{self, PromptContext};
use crate::application::risk_gate::{GateOutcome, RiskGate};
use crate::domain::errors::CycleError;
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::{
    AccountSnapshotRepository, AgentRepository, DecisionRepository, PerformanceRepository,
};
use crate::domain::types::{
    AccountSnapshot, AgentDecision, CycleStatus, Order, OrderSide, OrderStatus, Position,
    PositionSide,
};
use crate::infrastructure::observability::Metrics;

pub struct CycleOutcome {
    pub status: CycleStatus,
    pub error: Option<String>,
}

pub struct CycleRunner {
    collector: DataCollector,
    orchestrator: AgentOrchestrator,
    gate: RiskGate,
    executor: Executor,
    exchange: Arc<dyn ExchangeClient>,
    agents: Arc<dyn AgentRepository>,
    decisions: Arc<dyn DecisionRepository>,
    snapshots: Arc<dyn AccountSnapshotRepository>,
    performance: Arc<dyn PerformanceRepository>,
    metrics: Metrics,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collector: DataCollector,
        orchestrator: AgentOrchestrator,
        gate: RiskGate,
        executor: Executor,
        exchange: Arc<dyn ExchangeClient>,
        agents: Arc<dyn AgentRepository>,
        decisions: Arc<dyn DecisionRepository>,
        snapshots: Arc<dyn AccountSnapshotRepository>,
        performance: Arc<dyn PerformanceRepository>,
        metrics: Metrics,
    ) -> Self {
        Self {
            collector,
            orchestrator,
            gate,
            executor,
            exchange,
            agents,
            decisions,
            snapshots,
            performance,
            metrics,
        }
    }

    pub async fn run_cycle(&self, cycle_id: i64, service_start: DateTime<Utc>) -> CycleOutcome {
        match self.run_inner(cycle_id, service_start).await {
            Ok(status) => CycleOutcome {
                status,
                error: None,
            },
            Err(e) => {
                error!("CycleRunner: cycle {} failed: {}", cycle_id, e);
                let status = match &e {
                    CycleError::DataUnavailable { .. } => CycleStatus::DataUnavailable,
                    CycleError::Exchange(inner) if inner.is_fatal() => CycleStatus::ExchangeDown,
                    _ => CycleStatus::Failed,
                };
                CycleOutcome {
                    status,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run_inner(
        &self,
        cycle_id: i64,
        service_start: DateTime<Utc>,
    ) -> Result<CycleStatus, CycleError> {
        info!("CycleRunner: cycle {} starting", cycle_id);

        let agents = self
            .agents
            .active_agents()
            .await
            .map_err(CycleError::Persistence)?;

        let snapshot = self.collector.collect(cycle_id).await?;

        let account = self.exchange.account().await.map_err(CycleError::Exchange)?;
        let positions = self
            .exchange
            .positions()
            .await
            .map_err(CycleError::Exchange)?;

        self.metrics
            .equity_usd
            .set(rust_decimal::prelude::ToPrimitive::to_f64(&account.equity).unwrap_or(0.0));

        // Equity history feeds the prompt's return and Sharpe figures.
        let mut recent = self
            .snapshots
            .recent(30)
            .await
            .map_err(CycleError::Persistence)?;
        recent.reverse();
        let equity_history: Vec<Decimal> = recent.iter().map(|s| s.equity).collect();
        let initial_equity = self
            .snapshots
            .first()
            .await
            .map_err(CycleError::Persistence)?
            .map(|s| s.equity)
            .unwrap_or(account.equity);

        if agents.is_empty() {
            info!("CycleRunner: no active agents, cycle {} records snapshot only", cycle_id);
            self.persist_account_snapshot(cycle_id, &account, initial_equity)
                .await?;
            return Ok(CycleStatus::Ok);
        }

        let jobs: Vec<AgentJob> = agents
            .iter()
            .map(|agent| {
                let context = PromptContext {
                    snapshot: &snapshot,
                    account: &account,
                    positions: &positions,
                    service_start,
                    invocation: cycle_id,
                    initial_equity: Some(initial_equity),
                    equity_history: &equity_history,
                };
                let rendered = prompt::build_prompt(&context, &agent.risk_profile);
                let fingerprint = prompt::fingerprint(&rendered);
                AgentJob {
                    agent: agent.clone(),
                    prompt: rendered,
                    fingerprint,
                }
            })
            .collect();

        let decisions = self.orchestrator.dispatch(cycle_id, jobs).await;

        // Gate every decision, then persist all of them before any
        // execution touches the exchange.
        let mut gated: Vec<(AgentDecision, GateOutcome)> = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let profile = agents
                .iter()
                .find(|a| a.agent_id == decision.agent_id)
                .map(|a| a.risk_profile)
                .unwrap_or_else(|| {
                    warn!(
                        "CycleRunner: decision from unknown agent {}, using zero-risk profile",
                        decision.agent_id
                    );
                    crate::domain::types::RiskProfile {
                        max_leverage: 1,
                        max_position_fraction: Decimal::ZERO,
                        max_gross_exposure_fraction: Decimal::ZERO,
                        stop_loss_required: true,
                    }
                });
            let outcome = self.gate.evaluate(
                &decision.agent_id,
                &decision.actions,
                &profile,
                &account,
                &positions,
                &snapshot,
            );

            self.metrics
                .decisions_total
                .with_label_values(&[&decision.parse_status.to_string()])
                .inc();
            for rejection in &outcome.rejected {
                self.metrics
                    .risk_rejections_total
                    .with_label_values(&[&rejection.reason_code])
                    .inc();
            }

            self.decisions
                .save(&decision, &outcome.rejected)
                .await
                .map_err(CycleError::Persistence)?;
            gated.push((decision, outcome));
        }

        let mut status = CycleStatus::Ok;
        let mut cycle_orders: Vec<Order> = Vec::new();
        for (decision, outcome) in &gated {
            if let Err(e) = self
                .performance
                .record_decision(&decision.agent_id, decision.created_at)
                .await
            {
                warn!("CycleRunner: performance bookkeeping failed: {}", e);
            }

            let report = self
                .executor
                .execute(decision, &outcome.approved, &positions, &account, &snapshot)
                .await?;

            let placed = report.orders.len() as i64;
            let filled = report
                .orders
                .iter()
                .filter(|o| o.status == OrderStatus::Filled)
                .count() as i64;
            let realized = realized_pnl_delta(&report.orders, &positions);
            if placed > 0
                && let Err(e) = self
                    .performance
                    .record_orders(&decision.agent_id, placed, filled, realized)
                    .await
            {
                warn!("CycleRunner: performance bookkeeping failed: {}", e);
            }

            cycle_orders.extend(report.orders);

            if let Some(fatal) = report.fatal {
                error!(
                    "CycleRunner: exchange gone mid-execution ({}), aborting remaining decisions",
                    fatal
                );
                status = CycleStatus::ExchangeDown;
                break;
            }
        }

        if let Err(e) = self
            .executor
            .reconcile(cycle_id, &positions, &cycle_orders)
            .await
        {
            warn!("CycleRunner: reconciliation pass skipped: {}", e);
        }

        // Cycle-end account snapshot from the venue's fresh numbers.
        let account_after = match self.exchange.account().await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("CycleRunner: post-trade account fetch failed ({}), using pre-trade", e);
                account
            }
        };
        self.persist_account_snapshot(cycle_id, &account_after, initial_equity)
            .await?;

        info!("CycleRunner: cycle {} finished with status {}", cycle_id, status);
        Ok(status)
    }

    async fn persist_account_snapshot(
        &self,
        cycle_id: i64,
        account: &crate::domain::types::AccountState,
        initial_equity: Decimal,
    ) -> Result<(), CycleError> {
        let realized_total = (account.equity - account.unrealized_pnl) - initial_equity;
        self.snapshots
            .save(&AccountSnapshot {
                cycle_id,
                captured_at: Utc::now(),
                equity: account.equity,
                free_cash: account.free_cash,
                unrealized_pnl: account.unrealized_pnl,
                gross_exposure: account.gross_exposure,
                realized_pnl_total: realized_total,
            })
            .await
            .map_err(CycleError::Persistence)
    }
}

/// Realized PnL attribution for the cycle's closing fills, priced against
/// the entry recorded on the position being reduced.
fn realized_pnl_delta(orders: &[Order], positions_before: &[Position]) -> Decimal {
    let mut total = Decimal::ZERO;
    for order in orders {
        if order.status != OrderStatus::Filled || !order.reduce_only {
            continue;
        }
        let Some(position) = positions_before.iter().find(|p| p.coin == order.coin) else {
            continue;
        };
        let Some(exit_price) = order.limit_price else {
            continue;
        };
        let pnl = match position.side {
            PositionSide::Long => (exit_price - position.entry_price) * order.filled_size,
            PositionSide::Short => (position.entry_price - exit_price) * order.filled_size,
            PositionSide::Flat => Decimal::ZERO,
        };
        // Closing a long is a SELL; mismatched sides mean this fill was not
        // reducing that position after all.
        let reduces = matches!(
            (position.side, order.side),
            (PositionSide::Long, OrderSide::Sell) | (PositionSide::Short, OrderSide::Buy)
        );
        if reduces {
            total += pnl;
        }
    }
    total
}
