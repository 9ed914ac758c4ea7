//! Strategy configuration.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Which strategy handler processes incoming signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Limit-order entry, risk-bounded shared stop-loss, blacklist after stop-out
    Smart,
    /// Market-order clone of the signal source, size times the multiplier
    Copy,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Smart => f.write_str("smart"),
            StrategyKind::Copy => f.write_str("copy"),
        }
    }
}

/// Configuration for sizing and stop-loss placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Drawdown of the signal source's account (percent) at which we stop out
    pub source_stop_loss_pct: Decimal,

    /// Multiplier applied to the signal source's position size
    pub position_size_multiplier: u32,

    /// Pips in our favour from the source's open price for the entry limit order
    pub limit_order_offset_pips: u32,

    /// Pips that must separate the current price from a new shared stop-loss
    pub add_trade_min_gap_pips: u32,

    /// Largest adverse slip (pips) the plain copy strategy will still chase
    pub max_entry_slippage_pips: u32,

    /// Broker units per lot of the signal source
    pub units_per_source_lot: u32,

    /// Account size the signal source's lot sizes are quoted against
    pub source_reference_equity: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            source_stop_loss_pct: dec!(3.33333), // 75th-92nd percentile of source drawdowns
            position_size_multiplier: 3,
            limit_order_offset_pips: 10,
            add_trade_min_gap_pips: 10,
            max_entry_slippage_pips: 5,
            units_per_source_lot: 10_000,
            source_reference_equity: dec!(100000),
        }
    }
}

impl StrategyConfig {
    /// Percentage of our balance risked across all trades on one pair.
    pub fn account_risk_pct(&self) -> Decimal {
        self.source_stop_loss_pct * Decimal::from(self.position_size_multiplier)
    }
}
