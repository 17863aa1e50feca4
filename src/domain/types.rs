use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The fixed perp basket the system trades. Everything outside this set is
/// dropped during decision validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Coin {
    Btc,
    Eth,
    Sol,
    Bnb,
    Doge,
    Xrp,
}

pub const COIN_BASKET: [Coin; 6] = [
    Coin::Btc,
    Coin::Eth,
    Coin::Sol,
    Coin::Bnb,
    Coin::Doge,
    Coin::Xrp,
];

impl Coin {
    pub fn symbol(&self) -> &'static str {
        match self {
            Coin::Btc => "BTC",
            Coin::Eth => "ETH",
            Coin::Sol => "SOL",
            Coin::Bnb => "BNB",
            Coin::Doge => "DOGE",
            Coin::Xrp => "XRP",
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Coin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BTC" => Ok(Coin::Btc),
            "ETH" => Ok(Coin::Eth),
            "SOL" => Ok(Coin::Sol),
            "BNB" => Ok(Coin::Bnb),
            "DOGE" => Ok(Coin::Doge),
            "XRP" => Ok(Coin::Xrp),
            _ => anyhow::bail!("unknown coin symbol: {}", s),
        }
    }
}

/// Normalize a model-emitted symbol to the canonical basket spelling.
/// Handles venue suffixes ("BTCUSDT", "BTC-PERP", "BTC/USD") and case.
pub fn normalize_coin_symbol(raw: &str) -> Option<Coin> {
    let upper = raw.trim().to_uppercase();
    let stripped = upper
        .trim_end_matches("-PERP")
        .trim_end_matches("/USDT")
        .trim_end_matches("/USD")
        .trim_end_matches("USDT")
        .trim_end_matches("USD");
    Coin::from_str(stripped).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => anyhow::bail!("unknown order side: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
            PositionSide::Flat => write!(f, "FLAT"),
        }
    }
}

/// One structured action kind emitted by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOp {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl TradeOp {
    pub fn is_open(&self) -> bool {
        matches!(self, TradeOp::OpenLong | TradeOp::OpenShort)
    }
}

impl fmt::Display for TradeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOp::OpenLong => write!(f, "OPEN_LONG"),
            TradeOp::OpenShort => write!(f, "OPEN_SHORT"),
            TradeOp::Close => write!(f, "CLOSE"),
            TradeOp::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for TradeOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN_LONG" | "LONG" | "BUY" => Ok(TradeOp::OpenLong),
            "OPEN_SHORT" | "SHORT" | "SELL" => Ok(TradeOp::OpenShort),
            "CLOSE" | "EXIT" => Ok(TradeOp::Close),
            "HOLD" | "WAIT" => Ok(TradeOp::Hold),
            _ => anyhow::bail!("unknown operation: {}", s),
        }
    }
}

/// Outcome of parsing one agent's raw response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStatus {
    Ok,
    Malformed,
    Empty,
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseStatus::Ok => write!(f, "OK"),
            ParseStatus::Malformed => write!(f, "MALFORMED"),
            ParseStatus::Empty => write!(f, "EMPTY"),
        }
    }
}

impl FromStr for ParseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(ParseStatus::Ok),
            "MALFORMED" => Ok(ParseStatus::Malformed),
            "EMPTY" => Ok(ParseStatus::Empty),
            _ => anyhow::bail!("unknown parse status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Ok,
    Failed,
    DataUnavailable,
    ExchangeDown,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Ok => write!(f, "OK"),
            CycleStatus::Failed => write!(f, "FAILED"),
            CycleStatus::DataUnavailable => write!(f, "DATA_UNAVAILABLE"),
            CycleStatus::ExchangeDown => write!(f, "EXCHANGE_DOWN"),
        }
    }
}

impl FromStr for CycleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(CycleStatus::Ok),
            "FAILED" => Ok(CycleStatus::Failed),
            "DATA_UNAVAILABLE" => Ok(CycleStatus::DataUnavailable),
            "EXCHANGE_DOWN" => Ok(CycleStatus::ExchangeDown),
            _ => anyhow::bail!("unknown cycle status: {}", s),
        }
    }
}

/// Local order lifecycle. Transitions are monotonic:
/// SUBMITTED → {ACCEPTED → {FILLED | CANCELLED}} ∪ {REJECTED, FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Accepted,
    Filled,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Failed
        )
    }

    /// Whether moving to `next` respects the monotonic lifecycle.
    pub fn can_transition(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Submitted => matches!(
                next,
                OrderStatus::Accepted | OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Failed
            ),
            OrderStatus::Accepted => matches!(next, OrderStatus::Filled | OrderStatus::Cancelled),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(OrderStatus::Submitted),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "FAILED" => Ok(OrderStatus::Failed),
            _ => anyhow::bail!("unknown order status: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// One row of the intraday (3-minute) indicator series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntradayPoint {
    pub close: f64,
    pub ema20: f64,
    pub macd: f64,
    pub rsi7: f64,
    pub rsi14: f64,
}

/// One row of the 4-hour context series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextPoint {
    pub ema20: f64,
    pub ema50: f64,
    pub atr3: f64,
    pub atr14: f64,
    pub macd: f64,
    pub rsi14: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinView {
    pub mid_price: Decimal,
    pub open_interest: Decimal,
    pub funding_rate: Decimal,
    /// Oldest → newest, length 10.
    pub series_3m: Vec<IntradayPoint>,
    /// Oldest → newest, length 10.
    pub series_4h: Vec<ContextPoint>,
}

/// Immutable per-cycle view of the market, produced once and handed to every
/// agent. Not persisted in full; decisions keep only the prompt fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub cycle_id: i64,
    pub captured_at: DateTime<Utc>,
    pub coins: BTreeMap<Coin, CoinView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub max_leverage: u32,
    pub max_position_fraction: Decimal,
    pub max_gross_exposure_fraction: Decimal,
    pub stop_loss_required: bool,
}

/// One configured agent. Loaded from the database at cycle start; never
/// mutated mid-cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub display_name: String,
    pub is_active: bool,
    pub primary_model: String,
    pub fallback_model: String,
    pub risk_profile: RiskProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub coin: Coin,
    pub operation: TradeOp,
    /// Fraction of account equity committed as notional, in (0, 1].
    pub size_fraction: Decimal,
    pub leverage: u32,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub confidence: f64,
}

/// An intent the risk gate refused, kept for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedIntent {
    pub intent: TradeIntent,
    pub reason_code: String,
    pub detail: String,
}

/// One agent's decision for one cycle. Created by the orchestrator and
/// validator, read by the executor, never mutated after persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    pub decision_id: Uuid,
    pub cycle_id: i64,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub model_used: String,
    pub prompt_fingerprint: String,
    pub raw_response: String,
    pub chain_of_thought: String,
    pub actions: Vec<TradeIntent>,
    pub parse_status: ParseStatus,
}

impl AgentDecision {
    /// The decision recorded when both primary and fallback model failed.
    pub fn empty(cycle_id: i64, agent_id: &str, model_used: &str, fingerprint: &str) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            cycle_id,
            agent_id: agent_id.to_string(),
            created_at: Utc::now(),
            model_used: model_used.to_string(),
            prompt_fingerprint: fingerprint.to_string(),
            raw_response: String::new(),
            chain_of_thought: String::new(),
            actions: Vec::new(),
            parse_status: ParseStatus::Empty,
        }
    }
}

/// Local record of one exchange round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub decision_id: Uuid,
    pub cycle_id: i64,
    pub coin: Coin,
    pub side: OrderSide,
    pub intended_size: Decimal,
    pub filled_size: Decimal,
    /// None for the aggressive-IOC "market" path.
    pub limit_price: Option<Decimal>,
    pub leverage: u32,
    pub reduce_only: bool,
    /// Client idempotency key sent to the venue; stable across retries.
    pub client_order_id: String,
    pub exchange_order_id: Option<i64>,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Venue-reported position, cached for one cycle. The exchange stays the
/// source of truth; these are never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub coin: Coin,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
    pub liquidation_price: Option<Decimal>,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        (self.size * self.current_price).abs()
    }
}

/// Live account figures fetched from the venue each cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: Decimal,
    pub free_cash: Decimal,
    pub unrealized_pnl: Decimal,
    pub gross_exposure: Decimal,
}

/// Persisted per-cycle account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cycle_id: i64,
    pub captured_at: DateTime<Utc>,
    pub equity: Decimal,
    pub free_cash: Decimal,
    pub unrealized_pnl: Decimal,
    pub gross_exposure: Decimal,
    pub realized_pnl_total: Decimal,
}

/// Singleton process state. `cycle_count` is strictly non-decreasing across
/// restarts; a fresh start adopts the stored count and overwrites
/// `service_start_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    pub service_start_time: DateTime<Utc>,
    pub cycle_count: i64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_status: Option<CycleStatus>,
    pub last_error: Option<String>,
}

impl BotState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            service_start_time: now,
            cycle_count: 0,
            last_cycle_at: None,
            last_cycle_status: None,
            last_error: None,
        }
    }
}

/// Per-agent running aggregates, updated at cycle end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: String,
    pub orders_placed: i64,
    pub orders_filled: i64,
    pub realized_pnl: Decimal,
    pub last_decision_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_symbol_normalization() {
        assert_eq!(normalize_coin_symbol("BTC"), Some(Coin::Btc));
        assert_eq!(normalize_coin_symbol("btc"), Some(Coin::Btc));
        assert_eq!(normalize_coin_symbol("ETHUSDT"), Some(Coin::Eth));
        assert_eq!(normalize_coin_symbol("SOL-PERP"), Some(Coin::Sol));
        assert_eq!(normalize_coin_symbol("XRP/USD"), Some(Coin::Xrp));
        assert_eq!(normalize_coin_symbol("SHIB"), None);
    }

    #[test]
    fn order_status_transitions_are_monotonic() {
        assert!(OrderStatus::Submitted.can_transition(OrderStatus::Accepted));
        assert!(OrderStatus::Submitted.can_transition(OrderStatus::Rejected));
        assert!(OrderStatus::Accepted.can_transition(OrderStatus::Filled));
        assert!(OrderStatus::Accepted.can_transition(OrderStatus::Cancelled));

        assert!(!OrderStatus::Filled.can_transition(OrderStatus::Accepted));
        assert!(!OrderStatus::Rejected.can_transition(OrderStatus::Filled));
        assert!(!OrderStatus::Accepted.can_transition(OrderStatus::Submitted));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Submitted,
            OrderStatus::Accepted,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn open_short_aliases_parse() {
        assert_eq!("SHORT".parse::<TradeOp>().unwrap(), TradeOp::OpenShort);
        assert_eq!("open_long".parse::<TradeOp>().unwrap(), TradeOp::OpenLong);
        assert!("FLATTEN".parse::<TradeOp>().is_err());
    }
}
