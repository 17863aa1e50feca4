use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::errors::ExchangeError;

/// Round a price to the venue's tick convention: at most 5 significant
/// figures, and no more than `6 - sz_decimals` decimal places.
pub fn round_price(px: Decimal, sz_decimals: u32) -> Decimal {
    if px.is_zero() {
        return px;
    }
    let max_dp = 6u32.saturating_sub(sz_decimals);
    let magnitude = px.abs().to_f64().unwrap_or(0.0).log10().floor() as i32;
    let sig_dp = (4 - magnitude).max(0) as u32;
    px.round_dp(sig_dp.min(max_dp)).normalize()
}

/// Round a contract size down to the venue's size precision. Rounding down
/// keeps the notional at or below what the sizing computed.
pub fn round_size(size: Decimal, sz_decimals: u32) -> Decimal {
    size.round_dp_with_strategy(
        sz_decimals,
        rust_decimal::RoundingStrategy::ToZero,
    )
    .normalize()
}

/// Map an HTTP-level failure from the venue to the exchange error taxonomy.
pub fn classify_http_failure(err: &reqwest::Error) -> ExchangeError {
    if err.is_timeout() || err.is_connect() {
        return ExchangeError::Down {
            reason: err.to_string(),
        };
    }
    ExchangeError::Transient {
        reason: err.to_string(),
    }
}

/// Map a non-success venue status code.
pub fn classify_status(status: u16, body: String) -> ExchangeError {
    match status {
        401 | 403 => ExchangeError::Auth {
            reason: format!("{}: {}", status, body),
        },
        500..=599 => ExchangeError::Down {
            reason: format!("{}: {}", status, body),
        },
        429 => ExchangeError::Transient {
            reason: format!("rate limited: {}", body),
        },
        _ => ExchangeError::Rejected {
            reason: format!("{}: {}", status, body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_rounding_respects_significant_figures() {
        // 5 significant figures for a large price means whole dollars.
        assert_eq!(round_price(dec!(60000.4567), 5), dec!(60000));
        assert_eq!(round_price(dec!(1891.2345), 4), dec!(1891.2));
        // Small prices keep decimals up to the venue cap.
        assert_eq!(round_price(dec!(0.123456), 0), dec!(0.12346));
    }

    #[test]
    fn price_rounding_respects_decimal_cap() {
        // sz_decimals = 5 caps prices at 1 decimal place.
        assert_eq!(round_price(dec!(0.987654), 5), dec!(1.0).normalize());
    }

    #[test]
    fn size_rounding_never_rounds_up() {
        assert_eq!(round_size(dec!(0.016666), 3), dec!(0.016));
        assert_eq!(round_size(dec!(1.9999), 0), dec!(1));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, String::new()),
            ExchangeError::Auth { .. }
        ));
        assert!(matches!(
            classify_status(503, String::new()),
            ExchangeError::Down { .. }
        ));
        assert!(matches!(
            classify_status(429, String::new()),
            ExchangeError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(422, String::new()),
            ExchangeError::Rejected { .. }
        ));
    }
}
