//! In-memory broker that records every call. Used by the engine tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::models::{BrokerOrder, BrokerTrade, CurrencyPair, TradeSide};

use super::Broker;

/// One recorded broker call.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    AccountBalance,
    CurrentPrice(CurrencyPair),
    PerPip(CurrencyPair),
    OpenTrades(CurrencyPair),
    PendingOrders(CurrencyPair),
    OpenMarketTrade { side: TradeSide, units: u64, pair: CurrencyPair },
    CreateLimitOrder { side: TradeSide, units: u64, pair: CurrencyPair, bound: Decimal },
    SetTradeStopLoss { id: String, price: Decimal },
    SetOrderStopLoss { id: String, price: Decimal },
    CloseTrade(String),
    CancelOrder(String),
}

impl BrokerCall {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            BrokerCall::OpenMarketTrade { .. }
                | BrokerCall::CreateLimitOrder { .. }
                | BrokerCall::SetTradeStopLoss { .. }
                | BrokerCall::SetOrderStopLoss { .. }
                | BrokerCall::CloseTrade(_)
                | BrokerCall::CancelOrder(_)
        )
    }
}

#[derive(Default)]
struct PaperState {
    balance: Decimal,
    prices: HashMap<CurrencyPair, Decimal>,
    per_pip: HashMap<CurrencyPair, Decimal>,
    trades: Vec<(CurrencyPair, BrokerTrade)>,
    orders: Vec<(CurrencyPair, BrokerOrder)>,
    calls: Vec<BrokerCall>,
    fail_on: Option<&'static str>,
    fail_skip: usize,
    next_id: u64,
}

impl PaperState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    /// Record the call and trip the injected failure if it matches.
    fn record(&mut self, op: &'static str, call: BrokerCall) -> Result<()> {
        self.calls.push(call);
        if self.fail_on == Some(op) {
            if self.fail_skip > 0 {
                self.fail_skip -= 1;
                return Ok(());
            }
            self.fail_on = None;
            bail!("injected failure in {}", op);
        }
        Ok(())
    }
}

/// Cheap-to-clone handle onto a shared simulated account.
#[derive(Clone)]
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
}

impl PaperBroker {
    pub fn new(balance: Decimal) -> Self {
        let state = PaperState {
            balance,
            ..PaperState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn set_price(&self, pair: &CurrencyPair, price: Decimal) {
        self.state.write().await.prices.insert(pair.clone(), price);
    }

    pub async fn set_per_pip(&self, pair: &CurrencyPair, value: Decimal) {
        self.state.write().await.per_pip.insert(pair.clone(), value);
    }

    /// Seed an already-open trade; returns its id.
    pub async fn add_trade(
        &self,
        pair: &CurrencyPair,
        units: i64,
        open_price: Decimal,
        stop_loss: Option<Decimal>,
    ) -> String {
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.trades.push((
            pair.clone(),
            BrokerTrade {
                id: id.clone(),
                units,
                open_price,
                stop_loss,
            },
        ));
        id
    }

    /// Seed a pending limit order; returns its id.
    pub async fn add_order(&self, pair: &CurrencyPair, bound_price: Decimal) -> String {
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.orders.push((
            pair.clone(),
            BrokerOrder {
                id: id.clone(),
                bound_price,
                stop_loss: None,
            },
        ));
        id
    }

    /// Make the next call of `op` (the trait method name) fail.
    pub async fn fail_on(&self, op: &'static str) {
        self.fail_after(op, 0).await;
    }

    /// Let `skip` calls of `op` through, then fail the next one.
    pub async fn fail_after(&self, op: &'static str, skip: usize) {
        let mut state = self.state.write().await;
        state.fail_on = Some(op);
        state.fail_skip = skip;
    }

    pub async fn calls(&self) -> Vec<BrokerCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn mutations(&self) -> Vec<BrokerCall> {
        self.calls().await.into_iter().filter(|c| c.is_mutation()).collect()
    }

    pub async fn orders_for(&self, pair: &CurrencyPair) -> Vec<BrokerOrder> {
        let state = self.state.read().await;
        state
            .orders
            .iter()
            .filter(|(p, _)| p == pair)
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub async fn trades_for(&self, pair: &CurrencyPair) -> Vec<BrokerTrade> {
        let state = self.state.read().await;
        state
            .trades
            .iter()
            .filter(|(p, _)| p == pair)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

/// Pip value for a USD account when no explicit value was seeded.
fn default_per_pip(pair: &CurrencyPair, price: Decimal) -> Decimal {
    if pair.base() == "USD" && !price.is_zero() {
        pair.pip_size() / price
    } else {
        pair.pip_size()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn account_balance(&self) -> Result<Decimal> {
        let mut state = self.state.write().await;
        state.record("account_balance", BrokerCall::AccountBalance)?;
        Ok(state.balance)
    }

    async fn current_price(&self, _side: TradeSide, pair: &CurrencyPair) -> Result<Decimal> {
        let mut state = self.state.write().await;
        state.record("current_price", BrokerCall::CurrentPrice(pair.clone()))?;
        state
            .prices
            .get(pair)
            .copied()
            .ok_or_else(|| anyhow!("no price for {}", pair))
    }

    async fn account_currency_per_pip(&self, pair: &CurrencyPair) -> Result<Decimal> {
        let mut state = self.state.write().await;
        state.record("account_currency_per_pip", BrokerCall::PerPip(pair.clone()))?;
        if let Some(value) = state.per_pip.get(pair) {
            return Ok(*value);
        }
        let price = state.prices.get(pair).copied().unwrap_or_default();
        Ok(default_per_pip(pair, price))
    }

    async fn open_trades(&self, pair: &CurrencyPair) -> Result<Vec<BrokerTrade>> {
        self.state
            .write()
            .await
            .record("open_trades", BrokerCall::OpenTrades(pair.clone()))?;
        Ok(self.trades_for(pair).await)
    }

    async fn pending_orders(&self, pair: &CurrencyPair) -> Result<Vec<BrokerOrder>> {
        self.state
            .write()
            .await
            .record("pending_orders", BrokerCall::PendingOrders(pair.clone()))?;
        Ok(self.orders_for(pair).await)
    }

    async fn open_market_trade(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
    ) -> Result<String> {
        let mut state = self.state.write().await;
        state.record(
            "open_market_trade",
            BrokerCall::OpenMarketTrade { side, units, pair: pair.clone() },
        )?;
        let open_price = state
            .prices
            .get(pair)
            .copied()
            .ok_or_else(|| anyhow!("no price for {}", pair))?;
        let id = state.next_id();
        let signed_units = i64::try_from(units)? * side.sign();
        state.trades.push((
            pair.clone(),
            BrokerTrade {
                id: id.clone(),
                units: signed_units,
                open_price,
                stop_loss: None,
            },
        ));
        Ok(id)
    }

    async fn create_limit_order(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
        bound_price: Decimal,
    ) -> Result<String> {
        let mut state = self.state.write().await;
        state.record(
            "create_limit_order",
            BrokerCall::CreateLimitOrder { side, units, pair: pair.clone(), bound: bound_price },
        )?;
        let id = state.next_id();
        state.orders.push((
            pair.clone(),
            BrokerOrder {
                id: id.clone(),
                bound_price,
                stop_loss: None,
            },
        ));
        Ok(id)
    }

    async fn set_trade_stop_loss(&self, trade_id: &str, price: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        state.record(
            "set_trade_stop_loss",
            BrokerCall::SetTradeStopLoss { id: trade_id.to_string(), price },
        )?;
        let (_, trade) = state
            .trades
            .iter_mut()
            .find(|(_, t)| t.id == trade_id)
            .ok_or_else(|| anyhow!("unknown trade {}", trade_id))?;
        trade.stop_loss = Some(price);
        Ok(())
    }

    async fn set_order_stop_loss(&self, order_id: &str, price: Decimal) -> Result<String> {
        let mut state = self.state.write().await;
        state.record(
            "set_order_stop_loss",
            BrokerCall::SetOrderStopLoss { id: order_id.to_string(), price },
        )?;
        let (_, order) = state
            .orders
            .iter_mut()
            .find(|(_, o)| o.id == order_id)
            .ok_or_else(|| anyhow!("unknown order {}", order_id))?;
        order.stop_loss = Some(price);
        Ok(order_id.to_string())
    }

    async fn close_trade(&self, trade_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.record("close_trade", BrokerCall::CloseTrade(trade_id.to_string()))?;
        let before = state.trades.len();
        state.trades.retain(|(_, t)| t.id != trade_id);
        if state.trades.len() == before {
            bail!("unknown trade {}", trade_id);
        }
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.record("cancel_order", BrokerCall::CancelOrder(order_id.to_string()))?;
        let before = state.orders.len();
        state.orders.retain(|(_, o)| o.id != order_id);
        if state.orders.len() == before {
            bail!("unknown order {}", order_id);
        }
        Ok(())
    }
}
