//! Quote payload returned by the upstream provider and the lenient field
//! parsing applied before it reaches the store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Upper bound on the stored exchange name.
pub const EXCHANGE_NAME_MAX_CHARS: usize = 50;

/// Fundamentals record for one security. Every field is optional: absent
/// values never overwrite data already stored for the security.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsPayload {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub previous_close: Option<Decimal>,
    pub change: Option<Decimal>,
    pub market_cap: Option<i64>,
    pub volume: Option<i64>,
    pub avg_volume: Option<i64>,
    pub day_high: Option<Decimal>,
    pub day_low: Option<Decimal>,
    pub open: Option<Decimal>,
    pub year_high: Option<Decimal>,
    pub year_low: Option<Decimal>,
    pub price_avg_50: Option<Decimal>,
    pub price_avg_200: Option<Decimal>,
    pub exchange: Option<String>,
    pub timestamp: Option<i64>,
}

impl FundamentalsPayload {
    /// Builds a payload from one provider quote object.
    ///
    /// Numbers may arrive as JSON numbers or numeric strings; empty strings,
    /// nulls and unparseable values are treated as absent.
    pub fn from_quote(quote: &Map<String, Value>) -> Self {
        Self {
            name: text(quote.get("name")),
            price: decimal(quote.get("price")),
            previous_close: decimal(quote.get("previousClose")),
            change: decimal(quote.get("change")),
            market_cap: integer(quote.get("marketCap")),
            volume: integer(quote.get("volume")),
            avg_volume: integer(quote.get("avgVolume")),
            day_high: decimal(quote.get("dayHigh")),
            day_low: decimal(quote.get("dayLow")),
            open: decimal(quote.get("open")),
            year_high: decimal(quote.get("yearHigh")),
            year_low: decimal(quote.get("yearLow")),
            price_avg_50: decimal(quote.get("priceAvg50")),
            price_avg_200: decimal(quote.get("priceAvg200")),
            exchange: text(quote.get("exchange"))
                .map(|exchange| exchange.chars().take(EXCHANGE_NAME_MAX_CHARS).collect()),
            timestamp: integer(quote.get("timestamp")),
        }
    }

    /// Percentage move against the previous close, when both prices are known.
    pub fn day_change_percent(&self) -> Option<Decimal> {
        let previous = self.previous_close?;
        let change = match self.change {
            Some(change) => change,
            None => self.price?.checked_sub(previous)?,
        };
        change
            .checked_div(previous)?
            .checked_mul(Decimal::ONE_HUNDRED)
            .map(|percent| percent.round_dp(2))
    }

    /// True when the provider returned no usable field at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// Parses the literal text, so `189.84` stays exactly 189.84.
fn decimal(value: Option<&Value>) -> Option<Decimal> {
    let raw = match value? {
        Value::Number(number) => number.to_string(),
        Value::String(raw) => raw.trim().to_owned(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64)),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw.trim().to_owned()),
        _ => None,
    }
}
