//! Unauthenticated reads against the venue info endpoint.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;
use tracing::info;

use super::types::{AssetCtxWire, CandleWire, ClearinghouseStateWire, Meta};
use super::{HyperliquidClient, MetaCache, MetaEntry};
use crate::domain::errors::ExchangeError;
use crate::domain::ports::{AssetContext, CandleInterval};
use crate::domain::types::{AccountState, Candle, Coin, Position, PositionSide};

const META_CACHE_TTL_SECS: u64 = 3600;

pub(crate) fn parse_dec(raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw).map_err(|e| ExchangeError::Transient {
        reason: format!("bad decimal '{}' in venue payload: {}", raw, e),
    })
}

impl HyperliquidClient {
    async fn post_info<T: DeserializeOwned>(
        &self,
        body: serde_json::Value,
    ) -> Result<T, ExchangeError> {
        self.bucket.acquire().await;

        let response = self
            .info_http
            .post(&self.info_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::Down {
                reason: format!("info request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(super::common::classify_status(status.as_u16(), text));
        }

        response.json::<T>().await.map_err(|e| ExchangeError::Transient {
            reason: format!("failed to parse info response: {}", e),
        })
    }

    /// Resolve `(asset_index, sz_decimals)` for a coin from the cached meta
    /// response, refreshing the cache when stale.
    pub(crate) async fn meta_entry(&self, coin: Coin) -> Result<(u32, u32), ExchangeError> {
        {
            let cache = self.meta_cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed().as_secs() < META_CACHE_TTL_SECS
                && let Some(entry) = cached.assets.get(coin.symbol())
            {
                return Ok((entry.asset_index, entry.sz_decimals));
            }
        }

        let meta: Meta = self.post_info(json!({"type": "meta"})).await?;
        info!(
            "HyperliquidClient: resolved {} assets from venue meta",
            meta.universe.len()
        );

        let assets: HashMap<String, MetaEntry> = meta
            .universe
            .iter()
            .enumerate()
            .map(|(index, asset)| {
                (
                    asset.name.clone(),
                    MetaEntry {
                        asset_index: index as u32,
                        sz_decimals: asset.sz_decimals,
                    },
                )
            })
            .collect();

        let entry = assets
            .get(coin.symbol())
            .map(|e| (e.asset_index, e.sz_decimals))
            .ok_or_else(|| ExchangeError::Rejected {
                reason: format!("coin {} not listed in venue meta", coin),
            })?;

        *self.meta_cache.write().await = Some(MetaCache {
            assets,
            fetched_at: Instant::now(),
        });

        Ok(entry)
    }

    pub(crate) async fn fetch_candles(
        &self,
        coin: Coin,
        interval: CandleInterval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let end_ms = Utc::now().timestamp_millis();
        // One extra period of headroom so a partially-formed candle at the
        // edge does not shrink the window below `limit`.
        let start_ms = end_ms - interval.duration_ms() * (limit as i64 + 1);

        let wire: Vec<CandleWire> = self
            .post_info(json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": coin.symbol(),
                    "interval": interval.as_str(),
                    "startTime": start_ms,
                    "endTime": end_ms,
                }
            }))
            .await?;

        let mut candles = Vec::with_capacity(wire.len());
        for c in &wire {
            candles.push(Candle {
                timestamp: c.t,
                open: parse_dec(&c.o)?,
                high: parse_dec(&c.h)?,
                low: parse_dec(&c.l)?,
                close: parse_dec(&c.c)?,
                volume: parse_dec(&c.v)?,
            });
        }
        candles.sort_by_key(|c| c.timestamp);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    pub(crate) async fn fetch_asset_contexts(
        &self,
    ) -> Result<HashMap<Coin, AssetContext>, ExchangeError> {
        let (meta, ctxs): (Meta, Vec<AssetCtxWire>) =
            self.post_info(json!({"type": "metaAndAssetCtxs"})).await?;

        let mut contexts = HashMap::new();
        for (asset, ctx) in meta.universe.iter().zip(ctxs.iter()) {
            let Ok(coin) = Coin::from_str(&asset.name) else {
                continue;
            };
            let mid = match &ctx.mid_px {
                Some(px) => parse_dec(px)?,
                // Thin book with no mid: fall back to mark.
                None => parse_dec(&ctx.mark_px)?,
            };
            contexts.insert(
                coin,
                AssetContext {
                    mid_price: mid,
                    open_interest: parse_dec(&ctx.open_interest)?,
                    funding_rate: parse_dec(&ctx.funding)?,
                },
            );
        }
        Ok(contexts)
    }

    async fn clearinghouse(&self) -> Result<ClearinghouseStateWire, ExchangeError> {
        self.post_info(json!({
            "type": "clearinghouseState",
            "user": self.user_address,
        }))
        .await
    }

    pub(crate) async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let state = self.clearinghouse().await?;

        let mut positions = Vec::new();
        for wrapper in &state.asset_positions {
            let p = &wrapper.position;
            let Ok(coin) = Coin::from_str(&p.coin) else {
                continue;
            };
            let szi = parse_dec(&p.szi)?;
            if szi.is_zero() {
                continue;
            }
            let size = szi.abs();
            let position_value = parse_dec(&p.position_value)?;
            positions.push(Position {
                coin,
                side: if szi > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                size,
                entry_price: p.entry_px.as_deref().map(parse_dec).transpose()?.unwrap_or_default(),
                current_price: if size.is_zero() {
                    Decimal::ZERO
                } else {
                    position_value / size
                },
                unrealized_pnl: parse_dec(&p.unrealized_pnl)?,
                leverage: p.leverage.value,
                liquidation_price: p.liquidation_px.as_deref().map(parse_dec).transpose()?,
            });
        }
        Ok(positions)
    }

    pub(crate) async fn fetch_account(&self) -> Result<AccountState, ExchangeError> {
        let state = self.clearinghouse().await?;

        let mut unrealized = Decimal::ZERO;
        for wrapper in &state.asset_positions {
            unrealized += parse_dec(&wrapper.position.unrealized_pnl)?;
        }

        Ok(AccountState {
            equity: parse_dec(&state.margin_summary.account_value)?,
            free_cash: parse_dec(&state.withdrawable)?,
            unrealized_pnl: unrealized,
            gross_exposure: parse_dec(&state.margin_summary.total_ntl_pos)?,
        })
    }
}
