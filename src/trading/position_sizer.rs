//! Position sizing and risk-bounded stop-loss distance.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::StrategyConfig;

/// Converts signal sizes to broker units and risk budgets to stop distances.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: StrategyConfig,
}

impl PositionSizer {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Map the signal source's lot size onto our balance.
    ///
    /// Proportional: `size * units_per_lot * balance / reference_equity`,
    /// floored to whole units. Pure in `size` and `balance`.
    pub fn convert_size(&self, signal_size: u32, balance: Decimal) -> u64 {
        if balance <= Decimal::ZERO || self.config.source_reference_equity <= Decimal::ZERO {
            return 0;
        }

        let units = Decimal::from(signal_size)
            * Decimal::from(self.config.units_per_source_lot)
            * balance
            / self.config.source_reference_equity;

        units.floor().to_u64().unwrap_or(0)
    }

    /// Broker units for a signal: converted size times the multiplier.
    pub fn broker_units(&self, signal_size: u32, balance: Decimal) -> u64 {
        self.convert_size(signal_size, balance)
            .saturating_mul(u64::from(self.config.position_size_multiplier))
    }

    /// Target aggregate risk, percent of balance.
    pub fn risk_pct(&self) -> Decimal {
        self.config.account_risk_pct()
    }

    /// Stop-loss distance in whole pips so that being stopped out loses
    /// `risk_pct` of `balance`.
    ///
    /// Truncated, never rounded up: the realized loss is at most the target.
    /// Returns `None` when there is no exposure to size against.
    pub fn stop_loss_pips(
        balance: Decimal,
        risk_pct: Decimal,
        account_currency_per_pip: Decimal,
        units: u64,
    ) -> Option<u64> {
        let exposure_per_pip = account_currency_per_pip * Decimal::from(units);
        if exposure_per_pip <= Decimal::ZERO {
            return None;
        }

        let pips = balance * (risk_pct / dec!(100)) / exposure_per_pip;
        pips.trunc().to_u64()
    }
}
