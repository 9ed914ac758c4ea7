//! Order lifecycle: the broker-facing side of engine decisions.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::api::Broker;
use crate::models::{BrokerOrder, BrokerTrade, CurrencyPair, TradeSide};

use super::{EngineError, EngineResult};

fn broker_failure(op: &'static str, pair: &CurrencyPair) -> impl FnOnce(anyhow::Error) -> EngineError {
    let pair = pair.clone();
    move |e| EngineError::Broker(e.context(format!("{} on {} failed", op, pair)))
}

/// Issues broker calls one at a time, no retries. Prices are rounded to the
/// pair's quote precision before they leave this type.
pub struct OrderManager<B> {
    broker: B,
}

impl<B: Broker> OrderManager<B> {
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub async fn account_balance(&self) -> EngineResult<Decimal> {
        let balance = self
            .broker
            .account_balance()
            .await
            .map_err(|e| EngineError::Broker(e.context("account balance query failed")))?;

        if balance <= Decimal::ZERO {
            return Err(EngineError::Broker(anyhow::anyhow!(
                "account balance {} is not positive",
                balance
            )));
        }
        Ok(balance)
    }

    pub async fn current_price(&self, side: TradeSide, pair: &CurrencyPair) -> EngineResult<Decimal> {
        self.broker
            .current_price(side, pair)
            .await
            .map_err(broker_failure("price query", pair))
    }

    pub async fn account_currency_per_pip(&self, pair: &CurrencyPair) -> EngineResult<Decimal> {
        self.broker
            .account_currency_per_pip(pair)
            .await
            .map_err(broker_failure("pip value query", pair))
    }

    pub async fn open_trades(&self, pair: &CurrencyPair) -> EngineResult<Vec<BrokerTrade>> {
        let trades = self
            .broker
            .open_trades(pair)
            .await
            .map_err(broker_failure("trade query", pair))?;
        debug!(pair = %pair, count = trades.len(), "Queried open trades");
        Ok(trades)
    }

    pub async fn pending_orders(&self, pair: &CurrencyPair) -> EngineResult<Vec<BrokerOrder>> {
        let orders = self
            .broker
            .pending_orders(pair)
            .await
            .map_err(broker_failure("order query", pair))?;
        debug!(pair = %pair, count = orders.len(), "Queried pending orders");
        Ok(orders)
    }

    pub async fn open_market_trade(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
    ) -> EngineResult<String> {
        let id = self
            .broker
            .open_market_trade(side, units, pair)
            .await
            .map_err(broker_failure("market trade", pair))?;
        info!(pair = %pair, side = %side, units = units, trade_id = %id, "Opened market trade");
        Ok(id)
    }

    pub async fn create_limit_order(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
        bound_price: Decimal,
    ) -> EngineResult<String> {
        let bound_price = pair.round_price(bound_price);
        let id = self
            .broker
            .create_limit_order(side, units, pair, bound_price)
            .await
            .map_err(broker_failure("limit order", pair))?;
        info!(
            pair = %pair,
            side = %side,
            units = units,
            bound = %bound_price,
            order_id = %id,
            "Created limit order"
        );
        Ok(id)
    }

    pub async fn set_trade_stop_loss(
        &self,
        pair: &CurrencyPair,
        trade_id: &str,
        price: Decimal,
    ) -> EngineResult<()> {
        let price = pair.round_price(price);
        self.broker
            .set_trade_stop_loss(trade_id, price)
            .await
            .map_err(broker_failure("trade stop-loss", pair))?;
        info!(pair = %pair, trade_id = %trade_id, stop_loss = %price, "Set trade stop-loss");
        Ok(())
    }

    /// Returns the id of the order now carrying the stop.
    pub async fn set_order_stop_loss(
        &self,
        pair: &CurrencyPair,
        order_id: &str,
        price: Decimal,
    ) -> EngineResult<String> {
        let price = pair.round_price(price);
        let id = self
            .broker
            .set_order_stop_loss(order_id, price)
            .await
            .map_err(broker_failure("order stop-loss", pair))?;
        info!(pair = %pair, order_id = %id, stop_loss = %price, "Set order stop-loss");
        Ok(id)
    }

    pub async fn close_trade(&self, pair: &CurrencyPair, trade_id: &str) -> EngineResult<()> {
        self.broker
            .close_trade(trade_id)
            .await
            .map_err(broker_failure("close trade", pair))?;
        info!(pair = %pair, trade_id = %trade_id, "Closed trade");
        Ok(())
    }

    pub async fn cancel_order(&self, pair: &CurrencyPair, order_id: &str) -> EngineResult<()> {
        self.broker
            .cancel_order(order_id)
            .await
            .map_err(broker_failure("cancel order", pair))?;
        info!(pair = %pair, order_id = %order_id, "Cancelled order");
        Ok(())
    }

    /// Close every open trade on the pair; returns how many.
    pub async fn close_all_trades(&self, pair: &CurrencyPair) -> EngineResult<usize> {
        let trades = self.open_trades(pair).await?;
        for trade in &trades {
            self.close_trade(pair, &trade.id).await?;
        }
        Ok(trades.len())
    }

    /// Cancel every pending order on the pair; returns how many.
    pub async fn cancel_all_orders(&self, pair: &CurrencyPair) -> EngineResult<usize> {
        let orders = self.pending_orders(pair).await?;
        for order in &orders {
            self.cancel_order(pair, &order.id).await?;
        }
        Ok(orders.len())
    }
}
