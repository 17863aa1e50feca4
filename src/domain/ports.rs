use crate::domain::errors::{ExchangeError, ModelError};
use crate::domain::types::{AccountState, Candle, Coin, OrderSide, Position};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleInterval {
    ThreeMin,
    FourHour,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::ThreeMin => "3m",
            CandleInterval::FourHour => "4h",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            CandleInterval::ThreeMin => 3 * 60 * 1000,
            CandleInterval::FourHour => 4 * 60 * 60 * 1000,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-asset market context from the venue (mid, open interest, funding).
#[derive(Debug, Clone, Copy)]
pub struct AssetContext {
    pub mid_price: Decimal,
    pub open_interest: Decimal,
    pub funding_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

/// Conditional trigger attached to a reduce-only protective order.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub price: Decimal,
    pub kind: TriggerKind,
}

/// One order submission as handed to the venue client.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub coin: Coin,
    pub side: OrderSide,
    pub size: Decimal,
    /// Aggressive IOC limit price; the venue has no native market type.
    pub limit_price: Decimal,
    pub reduce_only: bool,
    pub trigger: Option<Trigger>,
    /// Client idempotency key; the venue deduplicates resubmissions.
    pub client_order_id: String,
}

/// Venue acknowledgement for one order.
#[derive(Debug, Clone)]
pub enum OrderAck {
    /// Order rests on the book (trigger orders park here until fired).
    Resting { exchange_order_id: i64 },
    /// IOC order crossed immediately.
    Filled {
        exchange_order_id: i64,
        total_size: Decimal,
        avg_price: Decimal,
    },
}

impl OrderAck {
    pub fn exchange_order_id(&self) -> i64 {
        match self {
            OrderAck::Resting { exchange_order_id } => *exchange_order_id,
            OrderAck::Filled {
                exchange_order_id, ..
            } => *exchange_order_id,
        }
    }
}

/// The single exchange venue: public reads plus signed writes.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Most-recent candles for one coin, oldest first.
    async fn candles(
        &self,
        coin: Coin,
        interval: CandleInterval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Mid / open-interest / funding for every coin the venue lists.
    async fn asset_contexts(&self) -> Result<HashMap<Coin, AssetContext>, ExchangeError>;

    async fn positions(&self) -> Result<Vec<Position>, ExchangeError>;

    async fn account(&self) -> Result<AccountState, ExchangeError>;

    /// Set isolated leverage for a coin; acknowledged before orders go out.
    async fn update_leverage(&self, coin: Coin, leverage: u32) -> Result<(), ExchangeError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    async fn cancel_order(&self, coin: Coin, exchange_order_id: i64) -> Result<(), ExchangeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// A provider's own OpenAI-compatible endpoint.
    Official,
    /// The OpenRouter aggregator; same wire protocol, different base URL.
    OpenRouter,
}

/// One `{provider, model}` pair an agent can be routed to.
#[derive(Debug, Clone)]
pub struct ModelEndpoint {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Narrow adapter over one OpenAI-compatible chat-completion endpoint.
/// One call, one attempt; retry and fallback policy live in the orchestrator.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        request: &ChatRequest,
    ) -> Result<String, ModelError>;
}
