//! In-memory venue and model doubles for tests and dry runs.

use crate::domain::errors::{ExchangeError, ModelError};
use crate::domain::ports::{
    AssetContext, CandleInterval, ChatRequest, CompletionClient, ExchangeClient, ModelEndpoint,
    OrderAck, OrderRequest,
};
use crate::domain::types::{AccountState, Candle, Coin, OrderSide, Position, PositionSide};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockFailure {
    #[default]
    None,
    /// Fail the next order acknowledgement once, after assigning the oid —
    /// the retry with the same client order id must deduplicate.
    AckOnce,
    Auth,
    Down,
}

pub struct MockExchangeState {
    pub mid_prices: HashMap<Coin, Decimal>,
    pub account: AccountState,
    pub positions: Vec<Position>,
    pub placed: Vec<OrderRequest>,
    pub leverage_updates: Vec<(Coin, u32)>,
    pub accepted_cloids: HashMap<String, i64>,
    pub failure: MockFailure,
    /// Return fewer candles than requested for this coin.
    pub short_candles_for: Option<Coin>,
    next_oid: i64,
}

impl Default for MockExchangeState {
    fn default() -> Self {
        let mut mid_prices = HashMap::new();
        mid_prices.insert(Coin::Btc, Decimal::from(60_000));
        mid_prices.insert(Coin::Eth, Decimal::from(3_000));
        mid_prices.insert(Coin::Sol, Decimal::from(150));
        mid_prices.insert(Coin::Bnb, Decimal::from(600));
        mid_prices.insert(Coin::Doge, Decimal::new(15, 2));
        mid_prices.insert(Coin::Xrp, Decimal::new(55, 2));

        Self {
            mid_prices,
            account: AccountState {
                equity: Decimal::from(10_000),
                free_cash: Decimal::from(10_000),
                unrealized_pnl: Decimal::ZERO,
                gross_exposure: Decimal::ZERO,
            },
            positions: Vec::new(),
            placed: Vec::new(),
            leverage_updates: Vec::new(),
            accepted_cloids: HashMap::new(),
            failure: MockFailure::None,
            short_candles_for: None,
            next_oid: 1000,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockExchangeClient {
    pub state: Arc<Mutex<MockExchangeState>>,
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failure(&self, failure: MockFailure) {
        self.state.lock().await.failure = failure;
    }

    pub async fn set_position(&self, position: Position) {
        let mut state = self.state.lock().await;
        state.positions.retain(|p| p.coin != position.coin);
        state.positions.push(position);
    }

    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.placed.clone()
    }

    /// Apply a fill to the tracked positions so the reconciliation pass sees
    /// the venue move the way a real one would.
    fn apply_fill(state: &mut MockExchangeState, req: &OrderRequest, price: Decimal) {
        let existing = state.positions.iter_mut().find(|p| p.coin == req.coin);
        match existing {
            Some(position) => {
                let signed = match position.side {
                    PositionSide::Long => position.size,
                    PositionSide::Short => -position.size,
                    PositionSide::Flat => Decimal::ZERO,
                };
                let delta = match req.side {
                    OrderSide::Buy => req.size,
                    OrderSide::Sell => -req.size,
                };
                let net = signed + delta;
                if net.is_zero() {
                    state.positions.retain(|p| p.coin != req.coin);
                } else {
                    position.side = if net > Decimal::ZERO {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    };
                    position.size = net.abs();
                    position.current_price = price;
                }
            }
            None => {
                state.positions.push(Position {
                    coin: req.coin,
                    side: if req.side == OrderSide::Buy {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    size: req.size,
                    entry_price: price,
                    current_price: price,
                    unrealized_pnl: Decimal::ZERO,
                    leverage: 1,
                    liquidation_price: None,
                });
            }
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn candles(
        &self,
        coin: Coin,
        interval: CandleInterval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.lock().await;
        let count = if state.short_candles_for == Some(coin) {
            limit / 4
        } else {
            limit
        };
        let mid = state.mid_prices.get(&coin).copied().unwrap_or(Decimal::ONE);
        let now = Utc::now().timestamp_millis();

        // Gentle deterministic wiggle so indicators have something to chew on.
        let candles = (0..count)
            .map(|i| {
                let phase = Decimal::from((i % 7) as i64) - Decimal::from(3);
                let close = mid + mid * phase / Decimal::from(1000);
                Candle {
                    timestamp: now - interval.duration_ms() * (count - i) as i64,
                    open: close - mid / Decimal::from(2000),
                    high: close + mid / Decimal::from(1000),
                    low: close - mid / Decimal::from(1000),
                    close,
                    volume: Decimal::from(100 + (i % 10) as i64),
                }
            })
            .collect();
        Ok(candles)
    }

    async fn asset_contexts(&self) -> Result<HashMap<Coin, AssetContext>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state
            .mid_prices
            .iter()
            .map(|(coin, mid)| {
                (
                    *coin,
                    AssetContext {
                        mid_price: *mid,
                        open_interest: Decimal::from(1_000_000),
                        funding_rate: Decimal::new(125, 7),
                    },
                )
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.state.lock().await.positions.clone())
    }

    async fn account(&self) -> Result<AccountState, ExchangeError> {
        Ok(self.state.lock().await.account)
    }

    async fn update_leverage(&self, coin: Coin, leverage: u32) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().await;
        match state.failure {
            MockFailure::Auth => {
                return Err(ExchangeError::Auth {
                    reason: "mock auth failure".to_string(),
                });
            }
            MockFailure::Down => {
                return Err(ExchangeError::Down {
                    reason: "mock endpoint down".to_string(),
                });
            }
            _ => {}
        }
        state.leverage_updates.push((coin, leverage));
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut state = self.state.lock().await;

        match state.failure {
            MockFailure::Auth => {
                return Err(ExchangeError::Auth {
                    reason: "mock auth failure".to_string(),
                });
            }
            MockFailure::Down => {
                return Err(ExchangeError::Down {
                    reason: "mock endpoint down".to_string(),
                });
            }
            _ => {}
        }

        // Venue-side idempotency: a client order id we have already accepted
        // resolves to the original oid, no new order.
        if let Some(existing_oid) = state.accepted_cloids.get(&request.client_order_id).copied() {
            return Ok(OrderAck::Filled {
                exchange_order_id: existing_oid,
                total_size: request.size,
                avg_price: request.limit_price,
            });
        }

        state.next_oid += 1;
        let oid = state.next_oid;
        state
            .accepted_cloids
            .insert(request.client_order_id.clone(), oid);
        state.placed.push(request.clone());

        if state.failure == MockFailure::AckOnce {
            // The order executed; only the acknowledgement is lost.
            state.failure = MockFailure::None;
            if request.trigger.is_none() {
                let price = request.limit_price;
                Self::apply_fill(&mut state, request, price);
            }
            return Err(ExchangeError::Transient {
                reason: "503 service unavailable".to_string(),
            });
        }

        if request.trigger.is_some() {
            return Ok(OrderAck::Resting {
                exchange_order_id: oid,
            });
        }

        let price = request.limit_price;
        Self::apply_fill(&mut state, request, price);

        Ok(OrderAck::Filled {
            exchange_order_id: oid,
            total_size: request.size,
            avg_price: price,
        })
    }

    async fn cancel_order(&self, _coin: Coin, _exchange_order_id: i64) -> Result<(), ExchangeError> {
        Ok(())
    }
}

pub type ScriptedResult = Result<String, fn() -> ModelError>;

#[derive(Default)]
pub struct MockModelState {
    /// Scripted responses per model name, consumed front to back.
    pub scripts: HashMap<String, Vec<ScriptedResult>>,
    pub calls: Vec<String>,
    /// Artificial latency per call, for overlap tests.
    pub delay: Option<std::time::Duration>,
}

#[derive(Clone, Default)]
pub struct MockCompletionClient {
    pub state: Arc<Mutex<MockModelState>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, model: &str, responses: Vec<ScriptedResult>) {
        self.state
            .lock()
            .await
            .scripts
            .insert(model.to_string(), responses);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn set_delay(&self, delay: std::time::Duration) {
        self.state.lock().await.delay = Some(delay);
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        _request: &ChatRequest,
    ) -> Result<String, ModelError> {
        let delay = { self.state.lock().await.delay };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.calls.push(endpoint.model.clone());

        match state.scripts.get_mut(&endpoint.model) {
            Some(queue) if !queue.is_empty() => match queue.remove(0) {
                Ok(text) => Ok(text),
                Err(make_err) => Err(make_err()),
            },
            _ => Ok(r#"{"actions": []}"#.to_string()),
        }
    }
}
