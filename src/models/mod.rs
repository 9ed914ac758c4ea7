//! Data models for signals, currency pairs and broker positions.

mod pair;
mod position;
mod signal;

pub use pair::CurrencyPair;
pub use position::{BrokerOrder, BrokerTrade};
pub use signal::{Signal, SignalAction, TradeSide};
