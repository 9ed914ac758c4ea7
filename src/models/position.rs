//! Broker-side view of filled trades and pending orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// A filled position on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerTrade {
    /// Broker trade identifier
    pub id: String,

    /// Open units, negative for sells
    pub units: i64,

    /// Average fill price
    pub open_price: Decimal,

    /// Attached stop-loss price, if any
    pub stop_loss: Option<Decimal>,
}

impl BrokerTrade {
    pub fn side(&self) -> TradeSide {
        if self.units < 0 {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }

    pub fn abs_units(&self) -> u64 {
        self.units.unsigned_abs()
    }
}

/// A pending (unfilled) limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Broker order identifier
    pub id: String,

    /// Limit price the order fills at
    pub bound_price: Decimal,

    /// Stop-loss attached on fill, if any
    pub stop_loss: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_side_from_units() {
        let trade = BrokerTrade {
            id: "1".to_string(),
            units: -2500,
            open_price: dec!(1.2),
            stop_loss: None,
        };
        assert_eq!(trade.side(), TradeSide::Sell);
        assert_eq!(trade.abs_units(), 2500);
    }
}
