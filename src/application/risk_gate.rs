//! Quantified safety invariants, checked per intent before anything touches
//! the exchange. The first failed rule rejects that intent only; the rest of
//! the decision is still considered.

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::errors::RiskViolation;
use crate::domain::types::{
    AccountState, MarketSnapshot, Position, PositionSide, RejectedIntent, RiskProfile, TradeIntent,
    TradeOp,
};

pub const DEFAULT_GLOBAL_MAX_LEVERAGE: u32 = 10;

#[derive(Debug, Default)]
pub struct GateOutcome {
    pub approved: Vec<TradeIntent>,
    pub rejected: Vec<RejectedIntent>,
}

pub struct RiskGate {
    global_max_leverage: u32,
}

impl RiskGate {
    pub fn new(global_max_leverage: u32) -> Self {
        Self { global_max_leverage }
    }

    /// Evaluate one decision's intents in order. Gross-exposure and margin
    /// budgets are consumed by earlier approvals within the same decision,
    /// so a burst of opens cannot sneak past the account-wide caps one by
    /// one.
    pub fn evaluate(
        &self,
        agent_id: &str,
        intents: &[TradeIntent],
        profile: &RiskProfile,
        account: &AccountState,
        positions: &[Position],
        snapshot: &MarketSnapshot,
    ) -> GateOutcome {
        let mut outcome = GateOutcome::default();
        let mut projected_gross = account.gross_exposure;
        let mut remaining_cash = account.free_cash;

        for intent in intents {
            match self.check_intent(
                intent,
                profile,
                account,
                positions,
                snapshot,
                projected_gross,
                remaining_cash,
            ) {
                Ok(()) => {
                    if intent.operation.is_open() {
                        let notional = intent.size_fraction * account.equity;
                        projected_gross += notional;
                        if intent.leverage > 0 {
                            remaining_cash -= notional / Decimal::from(intent.leverage);
                        }
                    }
                    outcome.approved.push(intent.clone());
                }
                Err(violation) => {
                    warn!(
                        "RiskGate: rejecting {} {} for {}: {}",
                        intent.operation, intent.coin, agent_id, violation
                    );
                    outcome.rejected.push(RejectedIntent {
                        intent: intent.clone(),
                        reason_code: violation.code().to_string(),
                        detail: violation.to_string(),
                    });
                }
            }
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn check_intent(
        &self,
        intent: &TradeIntent,
        profile: &RiskProfile,
        account: &AccountState,
        positions: &[Position],
        snapshot: &MarketSnapshot,
        projected_gross: Decimal,
        remaining_cash: Decimal,
    ) -> Result<(), RiskViolation> {
        if intent.operation == TradeOp::Hold {
            return Ok(());
        }

        let leverage_limit = profile.max_leverage.min(self.global_max_leverage);
        if intent.leverage > leverage_limit {
            return Err(RiskViolation::MaxLeverage {
                requested: intent.leverage,
                limit: leverage_limit,
            });
        }

        if intent.operation == TradeOp::Close {
            let has_position = positions
                .iter()
                .any(|p| p.coin == intent.coin && p.side != PositionSide::Flat);
            if !has_position {
                return Err(RiskViolation::NoPosition { coin: intent.coin });
            }
            return Ok(());
        }

        // OPEN_* from here on.
        let notional = intent.size_fraction * account.equity;

        let position_limit = profile.max_position_fraction * account.equity;
        let existing_notional: Decimal = positions
            .iter()
            .filter(|p| p.coin == intent.coin)
            .map(Position::notional)
            .sum();
        if existing_notional + notional > position_limit {
            return Err(RiskViolation::MaxPosition {
                coin: intent.coin,
                notional: existing_notional + notional,
                limit: position_limit,
            });
        }

        let gross_limit = profile.max_gross_exposure_fraction * account.equity;
        if projected_gross + notional > gross_limit {
            return Err(RiskViolation::MaxGrossExposure {
                projected: projected_gross + notional,
                limit: gross_limit,
            });
        }

        let required_margin = notional / Decimal::from(intent.leverage.max(1));
        if required_margin > remaining_cash {
            return Err(RiskViolation::InsufficientMargin {
                required: required_margin,
                available: remaining_cash,
            });
        }

        if profile.stop_loss_required {
            let mid = snapshot
                .coins
                .get(&intent.coin)
                .map(|view| view.mid_price)
                .unwrap_or(Decimal::ZERO);
            match intent.stop_loss_price {
                None => {
                    return Err(RiskViolation::StopLossRequired { coin: intent.coin });
                }
                Some(stop) => {
                    let wrong_side = match intent.operation {
                        TradeOp::OpenLong => stop >= mid,
                        TradeOp::OpenShort => stop <= mid,
                        _ => false,
                    };
                    if wrong_side {
                        return Err(RiskViolation::StopLossWrongSide {
                            coin: intent.coin,
                            stop,
                            mid,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
