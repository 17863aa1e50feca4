//! Market snapshot assembly.
//!
//! Fetches candle history and asset contexts for the fixed basket, computes
//! the indicator series and trims them to the prompt window. The HTTP layer
//! retries transient failures; anything still missing aborts the cycle with
//! `DataUnavailable` before any agent is called.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::indicators;
use crate::domain::errors::CycleError;
use crate::domain::ports::{CandleInterval, ExchangeClient};
use crate::domain::types::{COIN_BASKET, CoinView, MarketSnapshot};

const CANDLES_3M: usize = 200;
const CANDLES_4H: usize = 100;
/// Enough history to warm EMA50 and the MACD signal line before the
/// 10-row window starts.
const MIN_CANDLES: usize = 60;
/// Rows of each series that survive into the snapshot.
const SERIES_WINDOW: usize = 10;

pub struct DataCollector {
    exchange: Arc<dyn ExchangeClient>,
}

impl DataCollector {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    pub async fn collect(&self, cycle_id: i64) -> Result<MarketSnapshot, CycleError> {
        let contexts =
            self.exchange
                .asset_contexts()
                .await
                .map_err(|e| CycleError::DataUnavailable {
                    detail: format!("asset contexts: {}", e),
                })?;

        let mut coins = BTreeMap::new();
        for coin in COIN_BASKET {
            let context = contexts
                .get(&coin)
                .copied()
                .ok_or_else(|| CycleError::DataUnavailable {
                    detail: format!("no asset context for {}", coin),
                })?;

            let candles_3m = self
                .exchange
                .candles(coin, CandleInterval::ThreeMin, CANDLES_3M)
                .await
                .map_err(|e| CycleError::DataUnavailable {
                    detail: format!("{} 3m candles: {}", coin, e),
                })?;
            let candles_4h = self
                .exchange
                .candles(coin, CandleInterval::FourHour, CANDLES_4H)
                .await
                .map_err(|e| CycleError::DataUnavailable {
                    detail: format!("{} 4h candles: {}", coin, e),
                })?;

            if candles_3m.len() < MIN_CANDLES || candles_4h.len() < MIN_CANDLES {
                return Err(CycleError::DataUnavailable {
                    detail: format!(
                        "{}: {} 3m / {} 4h candles, need {}",
                        coin,
                        candles_3m.len(),
                        candles_4h.len(),
                        MIN_CANDLES
                    ),
                });
            }

            let series_3m = indicators::intraday_series(&candles_3m, SERIES_WINDOW).map_err(|e| {
                CycleError::DataUnavailable {
                    detail: format!("{} intraday indicators: {}", coin, e),
                }
            })?;
            let series_4h = indicators::context_series(&candles_4h, SERIES_WINDOW).map_err(|e| {
                CycleError::DataUnavailable {
                    detail: format!("{} context indicators: {}", coin, e),
                }
            })?;

            debug!(
                "DataCollector: {} mid={} oi={} funding={}",
                coin, context.mid_price, context.open_interest, context.funding_rate
            );

            coins.insert(
                coin,
                CoinView {
                    mid_price: context.mid_price,
                    open_interest: context.open_interest,
                    funding_rate: context.funding_rate,
                    series_3m,
                    series_4h,
                },
            );
        }

        info!(
            "DataCollector: snapshot for cycle {} assembled ({} coins)",
            cycle_id,
            coins.len()
        );

        Ok(MarketSnapshot {
            cycle_id,
            captured_at: Utc::now(),
            coins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Coin;
    use crate::infrastructure::mock::MockExchangeClient;

    #[tokio::test]
    async fn snapshot_covers_the_whole_basket() {
        let exchange = Arc::new(MockExchangeClient::new());
        let collector = DataCollector::new(exchange);

        let snapshot = collector.collect(1).await.unwrap();
        assert_eq!(snapshot.cycle_id, 1);
        assert_eq!(snapshot.coins.len(), COIN_BASKET.len());
        for view in snapshot.coins.values() {
            assert_eq!(view.series_3m.len(), 10);
            assert_eq!(view.series_4h.len(), 10);
            assert!(view.mid_price > rust_decimal::Decimal::ZERO);
        }
    }

    #[tokio::test]
    async fn short_history_aborts_the_cycle() {
        let exchange = Arc::new(MockExchangeClient::new());
        exchange.state.lock().await.short_candles_for = Some(Coin::Doge);
        let collector = DataCollector::new(exchange);

        let err = collector.collect(2).await.unwrap_err();
        assert!(matches!(err, CycleError::DataUnavailable { .. }));
        assert!(err.to_string().contains("DOGE"));
    }
}
