//! Currency pair identifiers and their quote precision.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Currencies the bridge knows how to trade.
pub const SUPPORTED_CURRENCIES: &[&str] = &[
    "USD", "EUR", "JPY", "GBP", "AUD", "NZD", "CAD", "CHF", "HKD", "SGD", "SEK", "NOK", "DKK",
    "ZAR", "MXN", "TRY", "PLN", "CZK", "HUF", "CNH", "THB",
];

const JPY: &str = "JPY";

/// A validated six-letter currency pair code such as `EURUSD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurrencyPair {
    code: String,
}

/// Reason a pair code was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairParseError {
    #[error("pair code is empty")]
    Empty,
    #[error("pair code {0:?} must be six letters")]
    BadLength(String),
    #[error("pair code {0:?} contains an unsupported currency")]
    UnknownCurrency(String),
    #[error("pair code {0:?} has the same base and quote currency")]
    SameCurrency(String),
}

impl CurrencyPair {
    /// Parse and normalize a pair code.
    ///
    /// Accepts surrounding whitespace, any case, and an optional `_` or `/`
    /// separator (`eur_usd`, `EUR/USD`, ` eurusd `).
    pub fn parse(raw: &str) -> Result<Self, PairParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PairParseError::Empty);
        }

        let code: String = trimmed
            .chars()
            .filter(|c| *c != '_' && *c != '/')
            .collect::<String>()
            .to_ascii_uppercase();

        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PairParseError::BadLength(trimmed.to_string()));
        }

        let (base, quote) = code.split_at(3);
        if !SUPPORTED_CURRENCIES.contains(&base) || !SUPPORTED_CURRENCIES.contains(&quote) {
            return Err(PairParseError::UnknownCurrency(trimmed.to_string()));
        }
        if base == quote {
            return Err(PairParseError::SameCurrency(trimmed.to_string()));
        }

        Ok(Self { code })
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn base(&self) -> &str {
        &self.code[..3]
    }

    pub fn quote(&self) -> &str {
        &self.code[3..]
    }

    /// Broker instrument name, e.g. `EUR_USD`.
    pub fn instrument(&self) -> String {
        format!("{}_{}", self.base(), self.quote())
    }

    pub fn is_jpy_quoted(&self) -> bool {
        self.quote() == JPY
    }

    /// Decimal places prices are rounded to.
    pub fn price_decimals(&self) -> u32 {
        if self.is_jpy_quoted() {
            2
        } else {
            4
        }
    }

    /// Size of one pip in quote currency.
    pub fn pip_size(&self) -> Decimal {
        if self.is_jpy_quoted() {
            dec!(0.01)
        } else {
            dec!(0.0001)
        }
    }

    /// Round a price to this pair's quote precision.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_decimals(), RoundingStrategy::MidpointAwayFromZero)
    }

    /// Convert a price distance to (fractional) pips.
    pub fn price_to_pips(&self, distance: Decimal) -> Decimal {
        distance / self.pip_size()
    }

    /// Convert a pip count to a price distance.
    pub fn pips_to_price(&self, pips: Decimal) -> Decimal {
        pips * self.pip_size()
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for CurrencyPair {
    type Err = PairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CurrencyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code)
    }
}

impl<'de> Deserialize<'de> for CurrencyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
