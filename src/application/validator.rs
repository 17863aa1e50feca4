//! Decision validation: free-form model text in, typed trade intents out.
//!
//! The validator is deterministic — the same raw text always yields the same
//! `(parse_status, actions)` pair. It only clamps fields the risk gate
//! re-checks; stop and take-profit prices are never altered here.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

use crate::domain::types::{ParseStatus, TradeIntent, TradeOp, normalize_coin_symbol};

#[derive(Debug, Clone)]
pub struct ValidatedDecision {
    pub parse_status: ParseStatus,
    pub actions: Vec<TradeIntent>,
    /// Narrative the model produced before its JSON payload.
    pub chain_of_thought: String,
}

impl ValidatedDecision {
    fn malformed(raw: &str) -> Self {
        Self {
            parse_status: ParseStatus::Malformed,
            actions: Vec::new(),
            chain_of_thought: raw.trim().to_string(),
        }
    }
}

fn extract_fenced_json(raw: &str) -> Option<(Value, usize)> {
    let fence_start = raw.find("```")?;
    let body_start = raw[fence_start + 3..]
        .find('\n')
        .map(|i| fence_start + 3 + i + 1)?;
    let fence_end = raw[body_start..].find("```")?;
    let body = raw[body_start..body_start + fence_end].trim();
    serde_json::from_str::<Value>(body)
        .ok()
        .map(|value| (value, fence_start))
}

/// Locate the first JSON object in the text: a fenced code block wins,
/// otherwise the first balanced `{...}` span. Returns the parsed value and
/// the byte offset where the payload starts.
fn extract_json(raw: &str) -> Option<(Value, usize)> {
    if let Some(found) = extract_fenced_json(raw) {
        return Some(found);
    }

    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[start..start + offset + 1];
                    return serde_json::from_str::<Value>(candidate)
                        .ok()
                        .map(|v| (v, start));
                }
            }
            _ => {}
        }
    }
    None
}

fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn coerce_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u32),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Build one intent from an action object. `Ok(None)` drops the action
/// (unknown coin); `Err(())` marks the whole decision malformed.
fn parse_action(action: &Value, agent_id: &str) -> Result<Option<TradeIntent>, ()> {
    let object = action.as_object().ok_or(())?;

    let coin_raw = object.get("coin").and_then(Value::as_str).ok_or(())?;
    let Some(coin) = normalize_coin_symbol(coin_raw) else {
        warn!(
            "DecisionValidator: {} referenced unknown coin '{}', dropping action",
            agent_id, coin_raw
        );
        return Ok(None);
    };

    let op_raw = object.get("operation").and_then(Value::as_str).ok_or(())?;
    let operation = TradeOp::from_str(op_raw).map_err(|_| ())?;

    if !operation.is_open() {
        return Ok(Some(TradeIntent {
            coin,
            operation,
            size_fraction: Decimal::ZERO,
            leverage: 1,
            stop_loss_price: None,
            take_profit_price: None,
            confidence: object
                .get("confidence")
                .and_then(coerce_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
        }));
    }

    // OPEN_* requires sizing, leverage and a stop price in the payload.
    let size_fraction = object
        .get("size_fraction")
        .and_then(coerce_decimal)
        .ok_or(())?;
    if size_fraction <= Decimal::ZERO {
        return Err(());
    }
    let leverage = object.get("leverage").and_then(coerce_u32).ok_or(())?;
    let stop_loss_price = match object.get("stop_loss_price") {
        Some(Value::Null) | None => None,
        Some(value) => Some(coerce_decimal(value).ok_or(())?),
    };
    let take_profit_price = match object.get("take_profit_price") {
        Some(Value::Null) | None => None,
        Some(value) => Some(coerce_decimal(value).ok_or(())?),
    };

    Ok(Some(TradeIntent {
        coin,
        operation,
        // The gate re-checks notional and leverage; out-of-range values are
        // clamped into the representable domain rather than invented.
        size_fraction: size_fraction.min(Decimal::ONE),
        leverage: leverage.max(1),
        stop_loss_price,
        take_profit_price,
        confidence: object
            .get("confidence")
            .and_then(coerce_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
    }))
}

pub fn validate(raw: &str, agent_id: &str) -> ValidatedDecision {
    let Some((payload, json_start)) = extract_json(raw) else {
        return ValidatedDecision::malformed(raw);
    };

    let actions_value = match &payload {
        Value::Object(object) => match object.get("actions") {
            Some(Value::Array(items)) => items.clone(),
            // A bare single-action object is accepted as a one-element list.
            None if object.contains_key("coin") && object.contains_key("operation") => {
                vec![payload.clone()]
            }
            _ => return ValidatedDecision::malformed(raw),
        },
        Value::Array(items) => items.clone(),
        _ => return ValidatedDecision::malformed(raw),
    };

    let mut actions = Vec::with_capacity(actions_value.len());
    for action in &actions_value {
        match parse_action(action, agent_id) {
            Ok(Some(intent)) => actions.push(intent),
            Ok(None) => {}
            Err(()) => return ValidatedDecision::malformed(raw),
        }
    }

    ValidatedDecision {
        parse_status: ParseStatus::Ok,
        actions,
        chain_of_thought: raw[..json_start].trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Coin;
    use rust_decimal_macros::dec;

    #[test]
    fn plain_json_object_parses() {
        let raw = r#"{"actions":[{"coin":"BTC","operation":"OPEN_LONG","size_fraction":0.1,"leverage":5,"stop_loss_price":58000}]}"#;
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Ok);
        assert_eq!(decision.actions.len(), 1);
        let intent = &decision.actions[0];
        assert_eq!(intent.coin, Coin::Btc);
        assert_eq!(intent.operation, TradeOp::OpenLong);
        assert_eq!(intent.size_fraction, dec!(0.1));
        assert_eq!(intent.leverage, 5);
        assert_eq!(intent.stop_loss_price, Some(dec!(58000)));
    }

    #[test]
    fn fenced_block_with_narrative_parses() {
        let raw = "Momentum looks stretched but funding is neutral.\n\
                   ```json\n{\"actions\": [{\"coin\": \"ETH\", \"operation\": \"HOLD\"}]}\n```\nDone.";
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Ok);
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.actions[0].operation, TradeOp::Hold);
        assert!(decision.chain_of_thought.contains("Momentum"));
    }

    #[test]
    fn narrative_before_bare_json_is_captured() {
        let raw = "I will open a small long.\n{\"actions\":[{\"coin\":\"SOL\",\"operation\":\"OPEN_LONG\",\"size_fraction\":\"0.05\",\"leverage\":\"3\",\"stop_loss_price\":\"140\"}]}";
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Ok);
        assert_eq!(decision.chain_of_thought, "I will open a small long.");
        // String-typed numerics are coerced.
        assert_eq!(decision.actions[0].size_fraction, dec!(0.05));
        assert_eq!(decision.actions[0].leverage, 3);
    }

    #[test]
    fn non_json_text_is_malformed() {
        let decision = validate("I think we should buy bitcoin today.", "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Malformed);
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn missing_required_fields_is_malformed() {
        let raw = r#"{"actions":[{"coin":"BTC","operation":"OPEN_LONG"}]}"#;
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Malformed);
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn uncoercible_numeric_is_malformed() {
        let raw = r#"{"actions":[{"coin":"BTC","operation":"OPEN_LONG","size_fraction":"a lot","leverage":5,"stop_loss_price":58000}]}"#;
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Malformed);
    }

    #[test]
    fn unknown_coins_are_dropped_not_fatal() {
        let raw = r#"{"actions":[
            {"coin":"SHIB","operation":"OPEN_LONG","size_fraction":0.1,"leverage":2,"stop_loss_price":1},
            {"coin":"XRPUSDT","operation":"HOLD"}
        ]}"#;
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Ok);
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.actions[0].coin, Coin::Xrp);
    }

    #[test]
    fn size_fraction_clamps_to_one() {
        let raw = r#"{"actions":[{"coin":"BTC","operation":"OPEN_SHORT","size_fraction":2.5,"leverage":0,"stop_loss_price":62000}]}"#;
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.actions[0].size_fraction, dec!(1));
        assert_eq!(decision.actions[0].leverage, 1);
    }

    #[test]
    fn validation_is_deterministic() {
        let raw = "Narrative.\n{\"actions\":[{\"coin\":\"BTC\",\"operation\":\"HOLD\"}]}";
        let a = validate(raw, "agent-1");
        let b = validate(raw, "agent-1");
        assert_eq!(a.parse_status, b.parse_status);
        assert_eq!(a.actions, b.actions);
        assert_eq!(a.chain_of_thought, b.chain_of_thought);
    }

    #[test]
    fn top_level_array_is_accepted() {
        let raw = r#"[{"coin":"DOGE","operation":"CLOSE"}]"#;
        // A bare array has no '{' prefix issue — the object scan starts at
        // the first action object and parses it alone, which is also valid.
        let decision = validate(raw, "agent-1");
        assert_eq!(decision.parse_status, ParseStatus::Ok);
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.actions[0].operation, TradeOp::Close);
    }
}
