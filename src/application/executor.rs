//! Trade execution: turns approved intents into venue orders.
//!
//! Per intent: reconcile leverage, diff current vs desired position, submit
//! aggressive IOC orders (the venue has no native market type), then park
//! reduce-only trigger orders for stop-loss / take-profit once the entry is
//! confirmed. Acknowledgement failures are retried with a client idempotency
//! key derived from `(decision_id, coin, sequence)` so a retry can never
//! double-place.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{CycleError, ExchangeError};
use crate::domain::ports::{ExchangeClient, OrderAck, OrderRequest, Trigger, TriggerKind};
use crate::domain::repositories::OrderRepository;
use crate::domain::types::{
    AccountState, AgentDecision, Coin, MarketSnapshot, Order, OrderSide, OrderStatus, Position,
    PositionSide, TradeIntent, TradeOp,
};
use crate::infrastructure::observability::Metrics;

const MAX_ACK_RETRIES: u32 = 2;
const RETRY_BACKOFF_MS: u64 = 500;

/// Client idempotency key for one submission, stable across retries.
fn idempotency_key(decision_id: Uuid, coin: Coin, sequence: u32) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", decision_id, coin, sequence).as_bytes());
    format!("0x{}", hex::encode(&digest[..16]))
}

#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub orders: Vec<Order>,
    /// Set when an auth failure or dead endpoint aborted the remaining
    /// intents; the cycle ends EXCHANGE_DOWN.
    pub fatal: Option<ExchangeError>,
}

enum SubmitOutcome {
    Filled { size: Decimal, price: Decimal },
    Resting,
    Rejected,
    Failed,
    Fatal(ExchangeError),
}

pub struct Executor {
    exchange: Arc<dyn ExchangeClient>,
    orders: Arc<dyn OrderRepository>,
    metrics: Metrics,
    slippage: Decimal,
}

impl Executor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        orders: Arc<dyn OrderRepository>,
        metrics: Metrics,
        slippage: Decimal,
    ) -> Self {
        Self {
            exchange,
            orders,
            metrics,
            slippage,
        }
    }

    fn aggressive_price(&self, mid: Decimal, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => mid * (Decimal::ONE + self.slippage),
            OrderSide::Sell => mid * (Decimal::ONE - self.slippage),
        }
    }

    async fn persist(&self, order: &Order) -> Result<(), CycleError> {
        self.orders
            .save(order)
            .await
            .map_err(CycleError::Persistence)
    }

    fn transition(&self, order: &mut Order, next: OrderStatus) {
        if !order.status.can_transition(next) {
            warn!(
                "Executor: refusing order {} transition {} -> {}",
                order.order_id, order.status, next
            );
            return;
        }
        order.status = next;
        if next.is_terminal() {
            order.finalized_at = Some(chrono::Utc::now());
            self.metrics
                .orders_total
                .with_label_values(&[&next.to_string()])
                .inc();
        }
    }

    /// Submit one order with bounded acknowledgement retries. The record is
    /// persisted at every status transition.
    async fn submit(
        &self,
        order: &mut Order,
        request: &OrderRequest,
    ) -> Result<SubmitOutcome, CycleError> {
        self.persist(order).await?;

        let mut attempt = 0u32;
        loop {
            match self.exchange.place_order(request).await {
                Ok(ack) => {
                    order.exchange_order_id = Some(ack.exchange_order_id());
                    self.transition(order, OrderStatus::Accepted);
                    self.persist(order).await?;

                    return match ack {
                        OrderAck::Filled {
                            total_size,
                            avg_price,
                            ..
                        } => {
                            order.filled_size = total_size;
                            self.transition(order, OrderStatus::Filled);
                            self.persist(order).await?;
                            Ok(SubmitOutcome::Filled {
                                size: total_size,
                                price: avg_price,
                            })
                        }
                        OrderAck::Resting { .. } => Ok(SubmitOutcome::Resting),
                    };
                }
                Err(e) if e.is_transient() && attempt < MAX_ACK_RETRIES => {
                    attempt += 1;
                    warn!(
                        "Executor: transient venue failure for {} (attempt {}/{}), retrying with same key: {}",
                        order.client_order_id, attempt, MAX_ACK_RETRIES, e
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS << attempt)).await;
                }
                Err(e) if e.is_fatal() => {
                    order.error_code = Some("EXCHANGE_DOWN".to_string());
                    order.error_message = Some(e.to_string());
                    self.transition(order, OrderStatus::Failed);
                    self.persist(order).await?;
                    return Ok(SubmitOutcome::Fatal(e));
                }
                Err(ExchangeError::Rejected { reason }) => {
                    order.error_code = Some("VENUE_REJECTED".to_string());
                    order.error_message = Some(reason);
                    self.transition(order, OrderStatus::Rejected);
                    self.persist(order).await?;
                    return Ok(SubmitOutcome::Rejected);
                }
                Err(e) => {
                    order.error_code = Some("EXCHANGE_TRANSIENT".to_string());
                    order.error_message = Some(e.to_string());
                    self.transition(order, OrderStatus::Failed);
                    self.persist(order).await?;
                    return Ok(SubmitOutcome::Failed);
                }
            }
        }
    }

    fn order_record(
        &self,
        decision: &AgentDecision,
        request: &OrderRequest,
        leverage: u32,
    ) -> Order {
        Order {
            order_id: Uuid::new_v4(),
            decision_id: decision.decision_id,
            cycle_id: decision.cycle_id,
            coin: request.coin,
            side: request.side,
            intended_size: request.size,
            filled_size: Decimal::ZERO,
            limit_price: Some(request.limit_price),
            leverage,
            reduce_only: request.reduce_only,
            client_order_id: request.client_order_id.clone(),
            exchange_order_id: None,
            status: OrderStatus::Submitted,
            submitted_at: chrono::Utc::now(),
            finalized_at: None,
            error_code: None,
            error_message: None,
        }
    }

    pub async fn execute(
        &self,
        decision: &AgentDecision,
        approved: &[TradeIntent],
        positions: &[Position],
        account: &AccountState,
        snapshot: &MarketSnapshot,
    ) -> Result<ExecutionReport, CycleError> {
        let mut report = ExecutionReport::default();
        let mut sequence = 0u32;

        for intent in approved {
            if intent.operation == TradeOp::Hold {
                continue;
            }
            if report.fatal.is_some() {
                break;
            }

            let position = positions
                .iter()
                .find(|p| p.coin == intent.coin && p.side != PositionSide::Flat);
            let mid = snapshot
                .coins
                .get(&intent.coin)
                .map(|v| v.mid_price)
                .or_else(|| position.map(|p| p.current_price))
                .unwrap_or(Decimal::ZERO);
            if mid.is_zero() {
                warn!(
                    "Executor: no price reference for {}, skipping intent",
                    intent.coin
                );
                continue;
            }

            match intent.operation {
                TradeOp::Close => {
                    let Some(position) = position else {
                        warn!(
                            "Executor: CLOSE {} with no live position, skipping",
                            intent.coin
                        );
                        continue;
                    };
                    let side = match position.side {
                        PositionSide::Long => OrderSide::Sell,
                        _ => OrderSide::Buy,
                    };
                    let request = OrderRequest {
                        coin: intent.coin,
                        side,
                        size: position.size,
                        limit_price: self.aggressive_price(mid, side),
                        reduce_only: true,
                        trigger: None,
                        client_order_id: idempotency_key(
                            decision.decision_id,
                            intent.coin,
                            sequence,
                        ),
                    };
                    sequence += 1;

                    let mut order = self.order_record(decision, &request, position.leverage);
                    let outcome = self.submit(&mut order, &request).await?;
                    if let SubmitOutcome::Fatal(e) = outcome {
                        report.fatal = Some(e);
                    }
                    report.orders.push(order);
                }
                TradeOp::OpenLong | TradeOp::OpenShort => {
                    let desired_side = if intent.operation == TradeOp::OpenLong {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    };

                    // 1. Leverage reconciliation. Failure aborts this intent
                    //    only, unless the venue itself is gone.
                    let venue_leverage = position.map(|p| p.leverage);
                    if venue_leverage != Some(intent.leverage) {
                        match self
                            .exchange
                            .update_leverage(intent.coin, intent.leverage)
                            .await
                        {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => {
                                error!("Executor: leverage update failed fatally: {}", e);
                                report.fatal = Some(e);
                                continue;
                            }
                            Err(e) => {
                                warn!(
                                    "Executor: leverage update for {} failed, skipping intent: {}",
                                    intent.coin, e
                                );
                                continue;
                            }
                        }
                    }

                    // 2. Opposite-side position must be flattened first and
                    //    confirmed before the new entry goes out.
                    if let Some(existing) = position
                        && existing.side != desired_side
                    {
                        let close_side = match existing.side {
                            PositionSide::Long => OrderSide::Sell,
                            _ => OrderSide::Buy,
                        };
                        let request = OrderRequest {
                            coin: intent.coin,
                            side: close_side,
                            size: existing.size,
                            limit_price: self.aggressive_price(mid, close_side),
                            reduce_only: true,
                            trigger: None,
                            client_order_id: idempotency_key(
                                decision.decision_id,
                                intent.coin,
                                sequence,
                            ),
                        };
                        sequence += 1;

                        let mut order = self.order_record(decision, &request, existing.leverage);
                        let outcome = self.submit(&mut order, &request).await?;
                        let flattened = matches!(outcome, SubmitOutcome::Filled { .. });
                        if let SubmitOutcome::Fatal(e) = outcome {
                            report.fatal = Some(e);
                        }
                        report.orders.push(order);
                        if !flattened {
                            warn!(
                                "Executor: could not confirm flatten of {} before reversal, skipping entry",
                                intent.coin
                            );
                            continue;
                        }
                    }

                    // 3. Entry order for the target delta.
                    let entry_side = if desired_side == PositionSide::Long {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    };
                    let notional = intent.size_fraction * account.equity;
                    let size = notional / mid;
                    let request = OrderRequest {
                        coin: intent.coin,
                        side: entry_side,
                        size,
                        limit_price: self.aggressive_price(mid, entry_side),
                        reduce_only: false,
                        trigger: None,
                        client_order_id: idempotency_key(
                            decision.decision_id,
                            intent.coin,
                            sequence,
                        ),
                    };
                    sequence += 1;

                    let mut order = self.order_record(decision, &request, intent.leverage);
                    let outcome = self.submit(&mut order, &request).await?;

                    let filled = match &outcome {
                        SubmitOutcome::Filled { size, price } => {
                            info!(
                                "Executor: {} {} {} filled at {} (cycle {})",
                                entry_side, size, intent.coin, price, decision.cycle_id
                            );
                            Some(*size)
                        }
                        SubmitOutcome::Fatal(_) => None,
                        _ => None,
                    };
                    if let SubmitOutcome::Fatal(e) = outcome {
                        report.fatal = Some(e);
                    }
                    report.orders.push(order);

                    // 4. Protective trigger orders only after a confirmed
                    //    entry fill.
                    let Some(filled_size) = filled else {
                        continue;
                    };
                    let protect_side = entry_side.opposite();
                    let protections = [
                        (intent.stop_loss_price, TriggerKind::StopLoss),
                        (intent.take_profit_price, TriggerKind::TakeProfit),
                    ];
                    for (price, kind) in protections {
                        let Some(trigger_price) = price else {
                            continue;
                        };
                        let request = OrderRequest {
                            coin: intent.coin,
                            side: protect_side,
                            size: filled_size,
                            limit_price: trigger_price,
                            reduce_only: true,
                            trigger: Some(Trigger {
                                price: trigger_price,
                                kind,
                            }),
                            client_order_id: idempotency_key(
                                decision.decision_id,
                                intent.coin,
                                sequence,
                            ),
                        };
                        sequence += 1;

                        let mut order = self.order_record(decision, &request, intent.leverage);
                        let outcome = self.submit(&mut order, &request).await?;
                        if let SubmitOutcome::Fatal(e) = outcome {
                            report.fatal = Some(e);
                        }
                        report.orders.push(order);
                    }
                }
                TradeOp::Hold => continue,
            }
        }

        Ok(report)
    }

    /// Post-execution reconciliation: venue positions must have moved
    /// consistently with the cycle's filled orders. Discrepancies are logged
    /// and counted, never blocking.
    pub async fn reconcile(
        &self,
        cycle_id: i64,
        positions_before: &[Position],
        orders: &[Order],
    ) -> Result<(), ExchangeError> {
        let venue_positions = self.exchange.positions().await?;

        let mut expected: HashMap<Coin, Decimal> = HashMap::new();
        for p in positions_before {
            let signed = match p.side {
                PositionSide::Long => p.size,
                PositionSide::Short => -p.size,
                PositionSide::Flat => Decimal::ZERO,
            };
            expected.insert(p.coin, signed);
        }
        for order in orders {
            if order.status != OrderStatus::Filled {
                continue;
            }
            let delta = match order.side {
                OrderSide::Buy => order.filled_size,
                OrderSide::Sell => -order.filled_size,
            };
            *expected.entry(order.coin).or_default() += delta;
        }

        let tolerance = Decimal::new(1, 3); // 0.1 % of size
        for (coin, expected_net) in &expected {
            let venue_net = venue_positions
                .iter()
                .find(|p| p.coin == *coin)
                .map(|p| match p.side {
                    PositionSide::Long => p.size,
                    PositionSide::Short => -p.size,
                    PositionSide::Flat => Decimal::ZERO,
                })
                .unwrap_or(Decimal::ZERO);

            let diff = (venue_net - expected_net).abs();
            let scale = expected_net.abs().max(Decimal::ONE);
            if diff / scale > tolerance {
                self.metrics.execution_drift_total.inc();
                warn!(
                    "Executor: EXECUTION_DRIFT on {} in cycle {}: expected net {}, venue reports {}",
                    coin, cycle_id, expected_net, venue_net
                );
            }
        }

        Ok(())
    }
}
