//! Canonical agent prompt.
//!
//! The format is a frozen contract: every block, label and ordering below is
//! load-bearing for reproducibility, and the sha256 fingerprint of the
//! rendered text is persisted with each decision. Changing anything here is
//! a deployment-level migration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};
use statrs::statistics::Statistics;
use std::fmt::Write as _;

use crate::domain::types::{AccountState, MarketSnapshot, Position, RiskProfile};

pub struct PromptContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub account: &'a AccountState,
    pub positions: &'a [Position],
    pub service_start: DateTime<Utc>,
    /// Invocation counter, i.e. the running cycle count.
    pub invocation: i64,
    /// Equity at the first recorded snapshot; baseline for total return.
    pub initial_equity: Option<Decimal>,
    /// Per-cycle equity history, oldest first, for the Sharpe figure.
    pub equity_history: &'a [Decimal],
}

pub fn fingerprint(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(digest)
}

/// Sharpe ratio over per-cycle equity returns. Zero until there are enough
/// points for a meaningful dispersion.
pub fn sharpe_ratio(equity_history: &[Decimal]) -> f64 {
    if equity_history.len() < 3 {
        return 0.0;
    }
    let values: Vec<f64> = equity_history
        .iter()
        .map(|e| e.to_f64().unwrap_or(0.0))
        .collect();
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();
    if std_dev == 0.0 || !std_dev.is_finite() {
        0.0
    } else {
        mean / std_dev
    }
}

fn series_line(label: &str, values: impl Iterator<Item = f64>) -> String {
    let rendered: Vec<String> = values.map(|v| format!("{:.4}", v)).collect();
    format!("  {}: [{}]", label, rendered.join(", "))
}

pub fn build_prompt(ctx: &PromptContext<'_>, profile: &RiskProfile) -> String {
    let elapsed_minutes = (ctx.snapshot.captured_at - ctx.service_start)
        .num_minutes()
        .max(0);

    let mut out = String::with_capacity(12 * 1024);

    let _ = writeln!(
        out,
        "You have been trading live for {} minutes. This is invocation #{} of your decision loop.",
        elapsed_minutes, ctx.invocation
    );
    let _ = writeln!(out);

    for (coin, view) in &ctx.snapshot.coins {
        let last_3m = view.series_3m.last();
        let _ = writeln!(out, "=== {} ===", coin);
        if let Some(point) = last_3m {
            let _ = writeln!(
                out,
                "current_price: {}, ema20: {:.4}, macd: {:.4}, rsi7: {:.2}",
                view.mid_price, point.ema20, point.macd, point.rsi7
            );
        }
        let _ = writeln!(out, "open_interest: {}", view.open_interest);
        let _ = writeln!(out, "funding_rate: {}", view.funding_rate);

        let _ = writeln!(out, "3m series (oldest to newest, 10 points):");
        let _ = writeln!(out, "{}", series_line("mid", view.series_3m.iter().map(|p| p.close)));
        let _ = writeln!(out, "{}", series_line("ema20", view.series_3m.iter().map(|p| p.ema20)));
        let _ = writeln!(out, "{}", series_line("macd", view.series_3m.iter().map(|p| p.macd)));
        let _ = writeln!(out, "{}", series_line("rsi7", view.series_3m.iter().map(|p| p.rsi7)));
        let _ = writeln!(out, "{}", series_line("rsi14", view.series_3m.iter().map(|p| p.rsi14)));

        let _ = writeln!(out, "4h context:");
        if let Some(point) = view.series_4h.last() {
            let _ = writeln!(
                out,
                "  ema20 vs ema50: {:.4} vs {:.4}",
                point.ema20, point.ema50
            );
            let _ = writeln!(
                out,
                "  atr3 vs atr14: {:.4} vs {:.4}",
                point.atr3, point.atr14
            );
        }
        let _ = writeln!(out, "{}", series_line("macd", view.series_4h.iter().map(|p| p.macd)));
        let _ = writeln!(out, "{}", series_line("rsi14", view.series_4h.iter().map(|p| p.rsi14)));
        let _ = writeln!(out);
    }

    let total_return_pct = match ctx.initial_equity {
        Some(initial) if !initial.is_zero() => {
            ((ctx.account.equity - initial) / initial * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        }
        _ => 0.0,
    };

    let _ = writeln!(out, "=== ACCOUNT ===");
    let _ = writeln!(out, "total_return_pct: {:.2}", total_return_pct);
    let _ = writeln!(out, "cash: {}", ctx.account.free_cash);
    let _ = writeln!(out, "equity: {}", ctx.account.equity);
    if ctx.positions.is_empty() {
        let _ = writeln!(out, "positions: none");
    } else {
        let _ = writeln!(out, "positions:");
        for p in ctx.positions {
            let exit_plan = match p.liquidation_price {
                Some(liq) => format!("liquidation at {}", liq),
                None => "none recorded".to_string(),
            };
            let _ = writeln!(
                out,
                "  {} {} qty={} entry={} current={} upnl={} leverage={}x exit_plan={}",
                p.coin, p.side, p.size, p.entry_price, p.current_price, p.unrealized_pnl,
                p.leverage, exit_plan
            );
        }
    }
    let _ = writeln!(out, "sharpe_ratio: {:.4}", sharpe_ratio(ctx.equity_history));
    let _ = writeln!(out);

    let _ = writeln!(out, "=== RISK LIMITS ===");
    let _ = writeln!(out, "max_leverage: {}x", profile.max_leverage);
    let _ = writeln!(out, "max_position_fraction: {}", profile.max_position_fraction);
    let _ = writeln!(
        out,
        "max_gross_exposure_fraction: {}",
        profile.max_gross_exposure_fraction
    );
    let _ = writeln!(out, "stop_loss_required: {}", profile.stop_loss_required);
    let _ = writeln!(out);

    let _ = writeln!(out, "=== TASK ===");
    let _ = writeln!(
        out,
        "Decide your trading actions for this cycle. Reason step by step, then finish with a single JSON object of the form:"
    );
    let _ = writeln!(
        out,
        r#"{{"actions": [{{"coin": "BTC", "operation": "OPEN_LONG", "size_fraction": 0.1, "leverage": 5, "stop_loss_price": 58000, "take_profit_price": 65000, "confidence": 0.7}}]}}"#
    );
    let _ = writeln!(
        out,
        "Valid operations: OPEN_LONG, OPEN_SHORT, CLOSE, HOLD. size_fraction is the fraction of equity to commit. Use HOLD when no action is warranted."
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Coin, CoinView, ContextPoint, IntradayPoint};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn snapshot() -> MarketSnapshot {
        let point_3m = IntradayPoint {
            close: 60000.0,
            ema20: 59950.0,
            macd: 12.5,
            rsi7: 61.0,
            rsi14: 58.0,
        };
        let point_4h = ContextPoint {
            ema20: 59800.0,
            ema50: 59000.0,
            atr3: 300.0,
            atr14: 420.0,
            macd: 25.0,
            rsi14: 55.0,
        };
        let mut coins = BTreeMap::new();
        coins.insert(
            Coin::Btc,
            CoinView {
                mid_price: dec!(60000),
                open_interest: dec!(1000000),
                funding_rate: dec!(0.0000125),
                series_3m: vec![point_3m; 10],
                series_4h: vec![point_4h; 10],
            },
        );
        MarketSnapshot {
            cycle_id: 7,
            captured_at: DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            coins,
        }
    }

    fn context<'a>(
        snap: &'a MarketSnapshot,
        account: &'a AccountState,
        history: &'a [Decimal],
    ) -> PromptContext<'a> {
        PromptContext {
            snapshot: snap,
            account,
            positions: &[],
            service_start: DateTime::parse_from_rfc3339("2024-06-01T11:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            invocation: 20,
            initial_equity: Some(dec!(10000)),
            equity_history: history,
        }
    }

    fn profile() -> RiskProfile {
        RiskProfile {
            max_leverage: 10,
            max_position_fraction: dec!(0.2),
            max_gross_exposure_fraction: dec!(0.8),
            stop_loss_required: true,
        }
    }

    #[test]
    fn prompt_carries_every_section() {
        let snap = snapshot();
        let account = AccountState {
            equity: dec!(11000),
            free_cash: dec!(9000),
            unrealized_pnl: dec!(0),
            gross_exposure: dec!(0),
        };
        let prompt = build_prompt(&context(&snap, &account, &[]), &profile());

        assert!(prompt.contains("60 minutes"));
        assert!(prompt.contains("invocation #20"));
        assert!(prompt.contains("=== BTC ==="));
        assert!(prompt.contains("open_interest"));
        assert!(prompt.contains("funding_rate"));
        assert!(prompt.contains("=== ACCOUNT ==="));
        assert!(prompt.contains("total_return_pct: 10.00"));
        assert!(prompt.contains("sharpe_ratio"));
        assert!(prompt.contains("=== TASK ==="));
        assert!(prompt.contains("OPEN_LONG, OPEN_SHORT, CLOSE, HOLD"));
    }

    #[test]
    fn equal_inputs_produce_equal_fingerprints() {
        let snap = snapshot();
        let account = AccountState {
            equity: dec!(10000),
            free_cash: dec!(10000),
            unrealized_pnl: dec!(0),
            gross_exposure: dec!(0),
        };
        let a = build_prompt(&context(&snap, &account, &[]), &profile());
        let b = build_prompt(&context(&snap, &account, &[]), &profile());
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let other_account = AccountState {
            equity: dec!(10001),
            ..account
        };
        let c = build_prompt(&context(&snap, &other_account, &[]), &profile());
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn sharpe_needs_history() {
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[dec!(10000), dec!(10100)]), 0.0);

        let rising = [dec!(10000), dec!(10100), dec!(10200), dec!(10300)];
        assert!(sharpe_ratio(&rising) > 0.0);
    }
}
