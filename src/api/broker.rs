//! The broker operations the copy engine depends on.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{BrokerOrder, BrokerTrade, CurrencyPair, TradeSide};

/// Brokerage account the signals are mirrored onto.
///
/// Every method is a single request with no retry of mutations. Prices passed
/// in are already rounded to the pair's quote precision.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Current account balance in account currency.
    async fn account_balance(&self) -> Result<Decimal>;

    /// Price a new trade on `side` would fill at right now.
    async fn current_price(&self, side: TradeSide, pair: &CurrencyPair) -> Result<Decimal>;

    /// Value of a one pip move for a single unit, in account currency.
    async fn account_currency_per_pip(&self, pair: &CurrencyPair) -> Result<Decimal>;

    /// Open (filled) trades on the pair.
    async fn open_trades(&self, pair: &CurrencyPair) -> Result<Vec<BrokerTrade>>;

    /// Pending entry orders on the pair.
    async fn pending_orders(&self, pair: &CurrencyPair) -> Result<Vec<BrokerOrder>>;

    /// Open a market trade; returns the new trade id.
    async fn open_market_trade(&self, side: TradeSide, units: u64, pair: &CurrencyPair)
        -> Result<String>;

    /// Place a limit order at `bound_price`; returns the order id.
    async fn create_limit_order(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
        bound_price: Decimal,
    ) -> Result<String>;

    /// Replace the stop-loss of an open trade.
    async fn set_trade_stop_loss(&self, trade_id: &str, price: Decimal) -> Result<()>;

    /// Replace the on-fill stop-loss of a pending order.
    ///
    /// Returns the id of the order that now carries the stop. Brokers that
    /// replace orders on modification hand back a new id.
    async fn set_order_stop_loss(&self, order_id: &str, price: Decimal) -> Result<String>;

    async fn close_trade(&self, trade_id: &str) -> Result<()>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}
