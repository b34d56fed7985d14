//! Currency conversion for monetary display.
//!
//! Live rates come from an external [`RateSource`]. When the source is
//! unavailable the last-known table below is used and the result is marked
//! approximate; a rate failure never fails a ledger operation.

use async_trait::async_trait;
use serde::Serialize;

/// Last-known rates per one US dollar, December 2024.
const FALLBACK_USD_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EGP", 49.0),
    ("SAR", 3.75),
    ("AED", 3.67),
    ("QAR", 3.64),
    ("KWD", 0.31),
    ("EUR", 0.95),
    ("GBP", 0.79),
];

/// Rounds to standard 2-decimal currency precision.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A provider of exchange rates against the US dollar.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `currency` per one US dollar.
    async fn usd_rate(&self, currency: &str) -> anyhow::Result<f64>;
}

/// A [`RateSource`] backed by the static fallback table. Wired as the default
/// when no live provider is configured.
pub struct FallbackRates;

#[async_trait]
impl RateSource for FallbackRates {
    async fn usd_rate(&self, currency: &str) -> anyhow::Result<f64> {
        fallback_rate(currency)
            .ok_or_else(|| anyhow::anyhow!("no rate on record for {currency}"))
    }
}

fn fallback_rate(currency: &str) -> Option<f64> {
    FALLBACK_USD_RATES
        .iter()
        .find(|(code, _)| *code == currency)
        .map(|(_, rate)| *rate)
}

/// A converted amount for display.
#[derive(Clone, Debug, Serialize)]
pub struct LocalAmount {
    /// The ISO currency code of the converted amount.
    pub currency: String,
    /// The converted amount, rounded to 2 decimals.
    pub amount: f64,
    /// Whether a fallback rate was used instead of a live one.
    pub approximate: bool,
}

/// Converts a USD amount for display in a local currency.
///
/// Falls back to the static table when the live source fails, and to a plain
/// USD figure when the currency is unknown to both; both fallbacks are marked
/// approximate.
pub async fn convert(source: &dyn RateSource, usd: f64, currency: &str) -> LocalAmount {
    match source.usd_rate(currency).await {
        Ok(rate) => LocalAmount {
            currency: currency.to_string(),
            amount: round2(usd * rate),
            approximate: false,
        },
        Err(e) => {
            tracing::warn!("rate lookup for {currency} failed, using fallback: {e:#}");
            match fallback_rate(currency) {
                Some(rate) => LocalAmount {
                    currency: currency.to_string(),
                    amount: round2(usd * rate),
                    approximate: true,
                },
                None => LocalAmount {
                    currency: "USD".to_string(),
                    amount: round2(usd),
                    approximate: true,
                },
            }
        }
    }
}
