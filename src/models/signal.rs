//! Trade signals received from the upstream signal service.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::CurrencyPair;

/// Whether the signal opens (or adds to) a position, or closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Open,
    Close,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Open => "OPEN",
            SignalAction::Close => "CLOSE",
        }
    }
}

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells. Broker units carry this sign.
    pub fn sign(&self) -> i64 {
        match self {
            TradeSide::Buy => 1,
            TradeSide::Sell => -1,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized open/close instruction for one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,

    pub side: TradeSide,

    /// Position size as reported by the signal source (its own lot units)
    pub size: u32,

    pub pair: CurrencyPair,

    /// Price at which the signal source opened the position
    pub open_price: Decimal,

    /// When the bridge received the signal
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Signal {
    /// Build a signal, rejecting non-positive sizes and prices.
    pub fn new(
        action: SignalAction,
        side: TradeSide,
        size: u32,
        pair: CurrencyPair,
        open_price: Decimal,
    ) -> Result<Self, String> {
        let signal = Self {
            action,
            side,
            size,
            pair,
            open_price,
            received_at: Utc::now(),
        };
        signal.validate()?;
        Ok(signal)
    }

    /// Check the input contract: size and open price must be positive.
    pub fn validate(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err(format!("signal for {} has zero size", self.pair));
        }
        if self.open_price <= Decimal::ZERO {
            return Err(format!(
                "signal for {} has non-positive open price {}",
                self.pair, self.open_price
            ));
        }
        Ok(())
    }

    /// Parse one JSON line as produced by the notification parser.
    pub fn from_json_line(line: &str) -> anyhow::Result<Self> {
        let signal: Signal = serde_json::from_str(line.trim())?;
        signal.validate().map_err(anyhow::Error::msg)?;
        Ok(signal)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} x{} @ {}",
            self.action, self.side, self.pair, self.size, self.open_price
        )
    }
}
