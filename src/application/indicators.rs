//! Indicator series computed with the `ta` crate's canonical formulas
//! (EMA, RSI, MACD 12/26/9, ATR). Indicators are warmed over the full candle
//! history; only the trailing window ends up in the snapshot.

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::{DataItem, Next};

use crate::domain::types::{Candle, ContextPoint, IntradayPoint};

fn to_f64(value: rust_decimal::Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn data_item(candle: &Candle) -> Result<DataItem> {
    DataItem::builder()
        .open(to_f64(candle.open))
        .high(to_f64(candle.high))
        .low(to_f64(candle.low))
        .close(to_f64(candle.close))
        .volume(to_f64(candle.volume))
        .build()
        .context("Candle fails OHLC sanity check")
}

/// Intraday series: close, EMA20, MACD line, RSI7, RSI14. Returns the last
/// `keep` rows, oldest first.
pub fn intraday_series(candles: &[Candle], keep: usize) -> Result<Vec<IntradayPoint>> {
    let mut ema20 = ExponentialMovingAverage::new(20).context("EMA period")?;
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).context("MACD periods")?;
    let mut rsi7 = RelativeStrengthIndex::new(7).context("RSI period")?;
    let mut rsi14 = RelativeStrengthIndex::new(14).context("RSI period")?;

    let mut points = Vec::with_capacity(candles.len());
    for candle in candles {
        let close = to_f64(candle.close);
        points.push(IntradayPoint {
            close,
            ema20: ema20.next(close),
            macd: macd.next(close).macd,
            rsi7: rsi7.next(close),
            rsi14: rsi14.next(close),
        });
    }

    if points.len() > keep {
        points.drain(..points.len() - keep);
    }
    Ok(points)
}

/// 4-hour context series: EMA20/EMA50, ATR3/ATR14, MACD line, RSI14.
/// Returns the last `keep` rows, oldest first.
pub fn context_series(candles: &[Candle], keep: usize) -> Result<Vec<ContextPoint>> {
    let mut ema20 = ExponentialMovingAverage::new(20).context("EMA period")?;
    let mut ema50 = ExponentialMovingAverage::new(50).context("EMA period")?;
    let mut atr3 = AverageTrueRange::new(3).context("ATR period")?;
    let mut atr14 = AverageTrueRange::new(14).context("ATR period")?;
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).context("MACD periods")?;
    let mut rsi14 = RelativeStrengthIndex::new(14).context("RSI period")?;

    let mut points = Vec::with_capacity(candles.len());
    for candle in candles {
        let close = to_f64(candle.close);
        let item = data_item(candle)?;
        points.push(ContextPoint {
            ema20: ema20.next(close),
            ema50: ema50.next(close),
            atr3: atr3.next(&item),
            atr14: atr14.next(&item),
            macd: macd.next(close).macd,
            rsi14: rsi14.next(close),
        });
    }

    if points.len() > keep {
        points.drain(..points.len() - keep);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn synthetic_candles(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                // Slow ramp with a small oscillation.
                let base = 100.0 + i as f64 * 0.5 + ((i % 5) as f64 - 2.0) * 0.3;
                let close = Decimal::from_f64_retain(base).unwrap_or_default();
                Candle {
                    timestamp: i as i64 * 180_000,
                    open: close - Decimal::new(1, 1),
                    high: close + Decimal::new(5, 1),
                    low: close - Decimal::new(5, 1),
                    close,
                    volume: Decimal::from(100),
                }
            })
            .collect()
    }

    #[test]
    fn intraday_series_keeps_requested_window() {
        let candles = synthetic_candles(200);
        let series = intraday_series(&candles, 10).unwrap();
        assert_eq!(series.len(), 10);
        // Oldest first: last row must match the most-recent close.
        let last_close = candles.last().unwrap().close;
        assert!((series[9].close - to_f64(last_close)).abs() < 1e-9);
    }

    #[test]
    fn ema_converges_toward_rising_prices() {
        let candles = synthetic_candles(200);
        let series = intraday_series(&candles, 10).unwrap();
        // On a steady uptrend the EMA lags the close but trends with it.
        assert!(series[9].ema20 < series[9].close);
        assert!(series[9].ema20 > series[0].ema20);
    }

    #[test]
    fn rsi_is_elevated_on_an_uptrend_and_bounded() {
        let candles = synthetic_candles(200);
        let series = intraday_series(&candles, 10).unwrap();
        for point in &series {
            assert!(point.rsi7 >= 0.0 && point.rsi7 <= 100.0);
            assert!(point.rsi14 >= 0.0 && point.rsi14 <= 100.0);
        }
        // Persistent gains keep RSI above the midline.
        assert!(series[9].rsi14 > 50.0);
    }

    #[test]
    fn context_series_computes_atr_spread() {
        let candles = synthetic_candles(100);
        let series = context_series(&candles, 10).unwrap();
        assert_eq!(series.len(), 10);
        for point in &series {
            assert!(point.atr3 > 0.0);
            assert!(point.atr14 > 0.0);
            assert!(point.ema20 > point.ema50 * 0.9);
        }
    }

    #[test]
    fn short_history_returns_what_exists() {
        let candles = synthetic_candles(4);
        let series = intraday_series(&candles, 10).unwrap();
        assert_eq!(series.len(), 4);
    }
}
