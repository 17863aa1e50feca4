use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::types::Coin;

/// Errors raised by the exchange venue client.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient exchange failure: {reason}")]
    Transient { reason: String },

    #[error("exchange authentication failed: {reason}")]
    Auth { reason: String },

    #[error("exchange unreachable: {reason}")]
    Down { reason: String },

    #[error("order rejected by venue: {reason}")]
    Rejected { reason: String },
}

impl ExchangeError {
    /// Auth failures and a dead endpoint abort the remaining intents of the
    /// cycle; everything else is retried or recorded per order.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Auth { .. } | ExchangeError::Down { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient { .. })
    }
}

/// Errors raised by one LLM request attempt.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("transient model failure: {reason}")]
    Transient { reason: String },

    #[error("provider error {status}: {body}")]
    Provider { status: u16, body: String },
}

impl ModelError {
    /// Timeouts, connection errors and 5xx are retried against the same
    /// model; provider 4xx goes straight to the fallback.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Timeout { .. } | ModelError::Transient { .. } => true,
            ModelError::Provider { status, .. } => *status >= 500,
        }
    }
}

/// Quantified risk-gate violations. Each variant carries the figures that
/// tripped it; `code()` is the stable reason string persisted with the
/// rejected intent.
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("leverage {requested}x exceeds limit {limit}x")]
    MaxLeverage { requested: u32, limit: u32 },

    #[error("position notional ${notional} for {coin} exceeds limit ${limit}")]
    MaxPosition {
        coin: Coin,
        notional: Decimal,
        limit: Decimal,
    },

    #[error("projected gross exposure ${projected} exceeds limit ${limit}")]
    MaxGrossExposure { projected: Decimal, limit: Decimal },

    #[error("initial margin ${required} exceeds free cash ${available}")]
    InsufficientMargin {
        required: Decimal,
        available: Decimal,
    },

    #[error("stop loss required for {coin} but missing")]
    StopLossRequired { coin: Coin },

    #[error("stop loss {stop} on wrong side of mid {mid} for {coin}")]
    StopLossWrongSide {
        coin: Coin,
        stop: Decimal,
        mid: Decimal,
    },

    #[error("no open position in {coin} to close")]
    NoPosition { coin: Coin },
}

impl RiskViolation {
    pub fn code(&self) -> &'static str {
        match self {
            RiskViolation::MaxLeverage { .. } => "MAX_LEVERAGE",
            RiskViolation::MaxPosition { .. } => "MAX_POSITION",
            RiskViolation::MaxGrossExposure { .. } => "MAX_GROSS_EXPOSURE",
            RiskViolation::InsufficientMargin { .. } => "INSUFFICIENT_MARGIN",
            RiskViolation::StopLossRequired { .. } => "STOP_LOSS_REQUIRED",
            RiskViolation::StopLossWrongSide { .. } => "STOP_LOSS_SIDE",
            RiskViolation::NoPosition { .. } => "NO_POSITION",
        }
    }
}

/// Failures that terminate one cycle. The scheduler records them and keeps
/// ticking; only configuration errors terminate the process.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("market data unavailable: {detail}")]
    DataUnavailable { detail: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}
