//! Smart copy engine: per-pair decision procedure for incoming signals.
//!
//! | signal | pair state  | action                                            |
//! |--------|-------------|---------------------------------------------------|
//! | CLOSE  | any         | close trades, cancel orders, pair becomes Fresh   |
//! | OPEN   | Blacklisted | nothing                                           |
//! | OPEN   | Fresh       | limit order below/above the signal, with stop     |
//! | OPEN   | Open        | add a trade under a negotiated shared stop-loss,  |
//! |        |             | wait on a pending entry, or blacklist if stopped  |
//!
//! Pair state is only committed after every broker call of the signal has
//! succeeded.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::api::Broker;
use crate::db::Database;
use crate::models::{CurrencyPair, Signal, SignalAction, TradeSide};

use super::{
    EngineError, EngineResult, Negotiation, NegotiationInput, OrderManager, PairStateStore,
    PairStatus, PositionSizer, RiskExposure, SignalOutcome, StopLossNegotiator, StrategyConfig,
    StrategyHandler,
};

/// Mirrors signals with limit-order entries and a risk-bounded shared stop.
pub struct SmartCopyEngine<B> {
    config: StrategyConfig,
    store: PairStateStore,
    orders: OrderManager<B>,
    sizer: PositionSizer,
    negotiator: StopLossNegotiator,
}

impl<B: Broker> SmartCopyEngine<B> {
    pub fn new(broker: B, config: StrategyConfig, store: PairStateStore) -> Self {
        let sizer = PositionSizer::new(config.clone());
        let negotiator = StopLossNegotiator::new(sizer.risk_pct(), config.add_trade_min_gap_pips);

        Self {
            config,
            store,
            orders: OrderManager::new(broker),
            sizer,
            negotiator,
        }
    }

    /// Build the engine from persisted pair state. Fails fatally on bad state.
    pub async fn load(broker: B, config: StrategyConfig, db: &Database) -> EngineResult<Self> {
        let store = PairStateStore::load(db).await?;
        Ok(Self::new(broker, config, store))
    }

    pub fn store(&self) -> &PairStateStore {
        &self.store
    }

    pub async fn handle(&mut self, signal: &Signal) -> EngineResult<SignalOutcome> {
        signal.validate().map_err(EngineError::InvalidSignal)?;

        let status = self.store.status(&signal.pair);
        info!(signal = %signal, state = %status, "Handling signal");

        match (signal.action, status) {
            (SignalAction::Close, _) => self.close(&signal.pair).await,
            (SignalAction::Open, PairStatus::Blacklisted) => {
                warn!(
                    pair = %signal.pair,
                    "Pair is blacklisted after a stop-out, ignoring signal until manually released"
                );
                Ok(SignalOutcome::IgnoredBlacklisted)
            }
            (SignalAction::Open, PairStatus::Fresh) => self.open_fresh(signal).await,
            (SignalAction::Open, PairStatus::Open) => self.open_existing(signal).await,
        }
    }

    async fn close(&mut self, pair: &CurrencyPair) -> EngineResult<SignalOutcome> {
        let trades = self.orders.close_all_trades(pair).await?;
        let orders = self.orders.cancel_all_orders(pair).await?;

        let previous = self.store.clear(pair)?;
        info!(
            pair = %pair,
            previous = %previous,
            trades = trades,
            orders = orders,
            "Pair closed"
        );
        Ok(SignalOutcome::Closed { trades, orders })
    }

    async fn open_fresh(&mut self, signal: &Signal) -> EngineResult<SignalOutcome> {
        let pair = &signal.pair;
        let balance = self.orders.account_balance().await?;
        let per_pip = self.orders.account_currency_per_pip(pair).await?;

        let units = self.sizer.broker_units(signal.size, balance);
        let stop_pips = match PositionSizer::stop_loss_pips(balance, self.sizer.risk_pct(), per_pip, units) {
            Some(pips) if units > 0 => pips,
            _ => {
                warn!(pair = %pair, balance = %balance, units = units, "Nothing to trade at this size");
                return Ok(SignalOutcome::SkippedTooSmall { units });
            }
        };

        let offset = pair.pips_to_price(Decimal::from(self.config.limit_order_offset_pips));
        let stop_distance = pair.pips_to_price(Decimal::from(stop_pips));
        let (bound, stop_loss) = match signal.side {
            TradeSide::Buy => {
                let bound = signal.open_price - offset;
                (bound, bound - stop_distance)
            }
            TradeSide::Sell => {
                let bound = signal.open_price + offset;
                (bound, bound + stop_distance)
            }
        };
        let bound = pair.round_price(bound);
        let stop_loss = pair.round_price(stop_loss);
        if stop_loss <= Decimal::ZERO {
            warn!(
                pair = %pair,
                units = units,
                stop_pips = stop_pips,
                "Stop-loss distance reaches past zero, position too small for the risk budget"
            );
            return Ok(SignalOutcome::SkippedTooSmall { units });
        }

        info!(
            pair = %pair,
            balance = %balance,
            units = units,
            stop_pips = stop_pips,
            "Opening fresh position"
        );

        let order_id = self
            .orders
            .create_limit_order(signal.side, units, pair, bound)
            .await?;
        let order_id = self.orders.set_order_stop_loss(pair, &order_id, stop_loss).await?;

        self.store.mark_open(pair)?;
        Ok(SignalOutcome::OrderCreated {
            order_id,
            units,
            bound,
            stop_loss,
        })
    }

    async fn open_existing(&mut self, signal: &Signal) -> EngineResult<SignalOutcome> {
        let pair = &signal.pair;
        let trades = self.orders.open_trades(pair).await?;
        let pending = self.orders.pending_orders(pair).await?;

        if trades.is_empty() {
            if !pending.is_empty() {
                warn!(
                    pair = %pair,
                    orders = pending.len(),
                    "Entry order not filled yet, additional signal needs manual intervention"
                );
                return Ok(SignalOutcome::AwaitingFill {
                    orders: pending.len(),
                });
            }

            self.store.mark_blacklisted(pair)?;
            warn!(pair = %pair, "Position was stopped out, pair blacklisted until manual review");
            return Ok(SignalOutcome::StoppedOut);
        }

        if let Some(opposed) = trades.iter().find(|t| t.side() != signal.side) {
            return Err(EngineError::InvalidSignal(format!(
                "{} signal on {} opposes open {} trade {}",
                signal.side,
                pair,
                opposed.side(),
                opposed.id
            )));
        }

        let balance = self.orders.account_balance().await?;
        let current_price = self.orders.current_price(signal.side, pair).await?;
        let per_pip = self.orders.account_currency_per_pip(pair).await?;
        let units = self.sizer.broker_units(signal.size, balance);
        if units == 0 {
            warn!(pair = %pair, balance = %balance, "Signal size converts to zero units");
            return Ok(SignalOutcome::SkippedTooSmall { units });
        }

        let negotiation = self.negotiator.negotiate(&NegotiationInput {
            pair,
            side: signal.side,
            trades: &trades,
            new_trade: RiskExposure {
                open_price: current_price,
                units,
            },
            current_price,
            balance,
            per_pip,
        })?;

        let (stop_loss, previous) = match negotiation {
            Negotiation::Clash {
                previous,
                candidate,
                reason,
            } => {
                warn!(
                    pair = %pair,
                    stop_loss = %previous,
                    candidate = %candidate,
                    price = %current_price,
                    reason = %reason,
                    "Stop-loss clash, not adding to position"
                );
                return Ok(SignalOutcome::Clash {
                    stop_loss: previous,
                    candidate,
                    reason,
                });
            }
            Negotiation::Agreed {
                stop_loss,
                previous,
                steps,
            } => {
                info!(
                    pair = %pair,
                    previous = %previous,
                    stop_loss = %stop_loss,
                    steps = steps,
                    "Negotiated shared stop-loss"
                );
                (stop_loss, previous)
            }
        };

        // Existing stops move before the trade opens; the new trade is never
        // left without a stop. On failure the broker is put back as it was.
        let mut moved: Vec<&str> = Vec::with_capacity(trades.len());
        for trade in &trades {
            if let Err(e) = self.orders.set_trade_stop_loss(pair, &trade.id, stop_loss).await {
                self.unwind_add(pair, &moved, previous, None).await;
                return Err(e);
            }
            moved.push(&trade.id);
        }

        let trade_id = match self.orders.open_market_trade(signal.side, units, pair).await {
            Ok(id) => id,
            Err(e) => {
                self.unwind_add(pair, &moved, previous, None).await;
                return Err(e);
            }
        };
        if let Err(e) = self.orders.set_trade_stop_loss(pair, &trade_id, stop_loss).await {
            self.unwind_add(pair, &moved, previous, Some(trade_id.as_str())).await;
            return Err(e);
        }

        Ok(SignalOutcome::AddedToPosition {
            trade_id,
            units,
            stop_loss,
            trades: trades.len() + 1,
        })
    }

    /// Undo a partially applied add: close the unprotected trade and put the
    /// moved stops back on `previous`. Best effort; failures are logged.
    async fn unwind_add(
        &self,
        pair: &CurrencyPair,
        moved: &[&str],
        previous: Decimal,
        new_trade: Option<&str>,
    ) {
        if let Some(trade_id) = new_trade {
            if let Err(e) = self.orders.close_trade(pair, trade_id).await {
                error!(
                    pair = %pair,
                    trade_id = %trade_id,
                    error = %e,
                    "Could not close trade left without a stop-loss, close it manually"
                );
            }
        }

        for trade_id in moved {
            if let Err(e) = self.orders.set_trade_stop_loss(pair, trade_id, previous).await {
                error!(
                    pair = %pair,
                    trade_id = %trade_id,
                    stop_loss = %previous,
                    error = %e,
                    "Could not restore stop-loss, stops on this pair now differ"
                );
            }
        }
        warn!(pair = %pair, restored = moved.len(), "Add to position rolled back");
    }
}

#[async_trait]
impl<B: Broker + 'static> StrategyHandler for SmartCopyEngine<B> {
    fn name(&self) -> &'static str {
        "smart"
    }

    async fn handle_signal(&mut self, signal: &Signal) -> EngineResult<SignalOutcome> {
        self.handle(signal).await
    }

    fn pair_state(&self) -> Option<&PairStateStore> {
        Some(&self.store)
    }

    async fn shutdown(&mut self, db: &Database) -> bool {
        self.store.save(db).await
    }
}
