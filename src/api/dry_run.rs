//! Dry-run broker: real reads, simulated writes.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::models::{BrokerOrder, BrokerTrade, CurrencyPair, TradeSide};

use super::Broker;

/// Wraps a live broker and logs mutations instead of sending them.
pub struct DryRunBroker<B> {
    inner: B,
}

impl<B: Broker> DryRunBroker<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    fn synthetic_id() -> String {
        format!("dry-{}", uuid::Uuid::new_v4())
    }
}

#[async_trait]
impl<B: Broker> Broker for DryRunBroker<B> {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn account_balance(&self) -> Result<Decimal> {
        self.inner.account_balance().await
    }

    async fn current_price(&self, side: TradeSide, pair: &CurrencyPair) -> Result<Decimal> {
        self.inner.current_price(side, pair).await
    }

    async fn account_currency_per_pip(&self, pair: &CurrencyPair) -> Result<Decimal> {
        self.inner.account_currency_per_pip(pair).await
    }

    async fn open_trades(&self, pair: &CurrencyPair) -> Result<Vec<BrokerTrade>> {
        self.inner.open_trades(pair).await
    }

    async fn pending_orders(&self, pair: &CurrencyPair) -> Result<Vec<BrokerOrder>> {
        self.inner.pending_orders(pair).await
    }

    async fn open_market_trade(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
    ) -> Result<String> {
        let id = Self::synthetic_id();
        info!(pair = %pair, side = %side, units = units, id = %id, "[DRY RUN] Would open market trade");
        Ok(id)
    }

    async fn create_limit_order(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
        bound_price: Decimal,
    ) -> Result<String> {
        let id = Self::synthetic_id();
        info!(
            pair = %pair,
            side = %side,
            units = units,
            bound = %bound_price,
            id = %id,
            "[DRY RUN] Would create limit order"
        );
        Ok(id)
    }

    async fn set_trade_stop_loss(&self, trade_id: &str, price: Decimal) -> Result<()> {
        info!(trade_id = %trade_id, stop_loss = %price, "[DRY RUN] Would set trade stop-loss");
        Ok(())
    }

    async fn set_order_stop_loss(&self, order_id: &str, price: Decimal) -> Result<String> {
        info!(order_id = %order_id, stop_loss = %price, "[DRY RUN] Would set order stop-loss");
        Ok(order_id.to_string())
    }

    async fn close_trade(&self, trade_id: &str) -> Result<()> {
        info!(trade_id = %trade_id, "[DRY RUN] Would close trade");
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        info!(order_id = %order_id, "[DRY RUN] Would cancel order");
        Ok(())
    }
}
