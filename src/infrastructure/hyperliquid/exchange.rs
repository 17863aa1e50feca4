//! Signed writes against the venue exchange endpoint.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use super::common::{classify_http_failure, classify_status, round_price, round_size};
use super::info::parse_dec;
use super::types::{
    Action, CancelWire, ExchangeRequest, LimitTif, OrderResponseData, OrderStatusAck,
    OrderTypeWire, OrderWire, TriggerWire,
};
use super::HyperliquidClient;
use crate::domain::errors::ExchangeError;
use crate::domain::ports::{OrderAck, OrderRequest, TriggerKind};
use crate::domain::types::{Coin, OrderSide};

impl HyperliquidClient {
    /// Sign and submit one action. Returns the venue's `response` payload.
    async fn post_action(&self, action: Action) -> Result<Value, ExchangeError> {
        self.bucket.acquire().await;

        let nonce = Utc::now().timestamp_millis() as u64;
        let signature =
            self.signer
                .sign_action(&action, nonce)
                .map_err(|e| ExchangeError::Auth {
                    reason: format!("signing failed: {}", e),
                })?;

        let request = ExchangeRequest {
            action,
            nonce,
            signature,
            vault_address: None,
        };

        let response = self
            .exchange_http
            .post(&self.exchange_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_http_failure(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }

        let body: Value = response.json().await.map_err(|e| ExchangeError::Transient {
            reason: format!("unparseable exchange response: {}", e),
        })?;

        match body.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(body.get("response").cloned().unwrap_or(Value::Null)),
            Some("err") => Err(ExchangeError::Rejected {
                reason: body
                    .get("response")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown venue error")
                    .to_string(),
            }),
            _ => Err(ExchangeError::Transient {
                reason: format!("unexpected exchange response shape: {}", body),
            }),
        }
    }

    pub(crate) async fn send_order(&self, req: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let (asset_index, sz_decimals) = self.meta_entry(req.coin).await?;

        let price = round_price(req.limit_price, sz_decimals);
        let size = round_size(req.size, sz_decimals);
        if size.is_zero() {
            return Err(ExchangeError::Rejected {
                reason: format!("size rounds to zero at {} decimals", sz_decimals),
            });
        }

        let order_type = match req.trigger {
            None => OrderTypeWire::Limit(LimitTif { tif: "Ioc".to_string() }),
            Some(trigger) => OrderTypeWire::Trigger(TriggerWire {
                is_market: true,
                trigger_px: round_price(trigger.price, sz_decimals).to_string(),
                tpsl: match trigger.kind {
                    TriggerKind::StopLoss => "sl".to_string(),
                    TriggerKind::TakeProfit => "tp".to_string(),
                },
            }),
        };

        let action = Action::Order {
            orders: vec![OrderWire {
                a: asset_index,
                b: req.side == OrderSide::Buy,
                p: price.to_string(),
                s: size.to_string(),
                r: req.reduce_only,
                t: order_type,
                c: Some(req.client_order_id.clone()),
            }],
            grouping: "na".to_string(),
        };

        debug!(
            "HyperliquidClient: submitting {} {} {} @ {} (cloid {})",
            req.side, size, req.coin, price, req.client_order_id
        );

        let response = self.post_action(action).await?;
        let data: OrderResponseData = serde_json::from_value(
            response
                .get("data")
                .cloned()
                .unwrap_or(Value::Null),
        )
        .map_err(|e| ExchangeError::Transient {
            reason: format!("unparseable order acknowledgement: {}", e),
        })?;

        match data.statuses.into_iter().next() {
            Some(OrderStatusAck::Filled(fill)) => Ok(OrderAck::Filled {
                exchange_order_id: fill.oid,
                total_size: parse_dec(&fill.total_sz)?,
                avg_price: parse_dec(&fill.avg_px)?,
            }),
            Some(OrderStatusAck::Resting(resting)) => Ok(OrderAck::Resting {
                exchange_order_id: resting.oid,
            }),
            Some(OrderStatusAck::Error(reason)) => Err(ExchangeError::Rejected { reason }),
            None => Err(ExchangeError::Transient {
                reason: "order acknowledgement carried no statuses".to_string(),
            }),
        }
    }

    pub(crate) async fn send_update_leverage(
        &self,
        coin: Coin,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        let (asset_index, _) = self.meta_entry(coin).await?;

        let action = Action::UpdateLeverage {
            asset: asset_index,
            is_cross: self.is_cross,
            leverage,
        };

        self.post_action(action).await?;
        info!("HyperliquidClient: leverage for {} set to {}x", coin, leverage);
        Ok(())
    }

    pub(crate) async fn send_cancel(
        &self,
        coin: Coin,
        exchange_order_id: i64,
    ) -> Result<(), ExchangeError> {
        let (asset_index, _) = self.meta_entry(coin).await?;

        let action = Action::Cancel {
            cancels: vec![CancelWire {
                a: asset_index,
                o: exchange_order_id,
            }],
        };

        self.post_action(action).await?;
        Ok(())
    }
}
