//! Strategy handlers: what happens to a signal once it reaches the bridge.
//!
//! Two handlers exist:
//! - `SmartCopyEngine` (in `copy_engine`): limit-order entry, shared
//!   risk-bounded stop-loss, blacklisting after a stop-out
//! - `CopyStrategy`: a plain market-order clone of the signal source

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::Broker;
use crate::db::Database;
use crate::models::{Signal, SignalAction, TradeSide};

use super::{ClashReason, EngineError, EngineResult, OrderManager, PairStateStore, PositionSizer, StrategyConfig};

/// What a handler did with one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// Every trade closed and every pending order cancelled.
    Closed { trades: usize, orders: usize },
    /// Fresh pair: limit entry placed with its stop-loss.
    OrderCreated {
        order_id: String,
        units: u64,
        bound: Decimal,
        stop_loss: Decimal,
    },
    /// One more trade opened, all trades moved to the new shared stop.
    AddedToPosition {
        trade_id: String,
        units: u64,
        stop_loss: Decimal,
        trades: usize,
    },
    IgnoredBlacklisted,
    /// The negotiated stop-loss was unusable; nothing changed.
    Clash {
        stop_loss: Decimal,
        candidate: Decimal,
        reason: ClashReason,
    },
    /// Only the entry order exists; needs a human.
    AwaitingFill { orders: usize },
    /// The pair was open but the broker has nothing left: blacklisted.
    StoppedOut,
    /// The signal maps to zero broker units on this balance.
    SkippedTooSmall { units: u64 },
    MarketOpened {
        trade_id: String,
        units: u64,
        price: Decimal,
    },
    /// Price moved too far from the signal's open price.
    MissedEntry {
        price: Decimal,
        slippage_pips: Decimal,
    },
}

impl SignalOutcome {
    /// Short, stable name stored in the signal journal.
    pub fn label(&self) -> &'static str {
        match self {
            SignalOutcome::Closed { .. } => "closed",
            SignalOutcome::OrderCreated { .. } => "order_created",
            SignalOutcome::AddedToPosition { .. } => "added_to_position",
            SignalOutcome::IgnoredBlacklisted => "ignored_blacklisted",
            SignalOutcome::Clash { .. } => "clash",
            SignalOutcome::AwaitingFill { .. } => "awaiting_fill",
            SignalOutcome::StoppedOut => "stopped_out",
            SignalOutcome::SkippedTooSmall { .. } => "skipped_too_small",
            SignalOutcome::MarketOpened { .. } => "market_opened",
            SignalOutcome::MissedEntry { .. } => "missed_entry",
        }
    }
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalOutcome::Closed { trades, orders } => {
                write!(f, "closed {} trades, cancelled {} orders", trades, orders)
            }
            SignalOutcome::OrderCreated {
                order_id,
                units,
                bound,
                stop_loss,
            } => write!(
                f,
                "limit order {} for {} units at {} with stop-loss {}",
                order_id, units, bound, stop_loss
            ),
            SignalOutcome::AddedToPosition {
                trade_id,
                units,
                stop_loss,
                trades,
            } => write!(
                f,
                "added trade {} for {} units, {} trades now share stop-loss {}",
                trade_id, units, trades, stop_loss
            ),
            SignalOutcome::IgnoredBlacklisted => f.write_str("ignored, pair is blacklisted"),
            SignalOutcome::Clash {
                stop_loss,
                candidate,
                reason,
            } => write!(
                f,
                "stop-loss clash: candidate {} {}, keeping {}",
                candidate, reason, stop_loss
            ),
            SignalOutcome::AwaitingFill { orders } => {
                write!(f, "{} entry orders still pending, manual intervention needed", orders)
            }
            SignalOutcome::StoppedOut => f.write_str("position was stopped out, pair blacklisted"),
            SignalOutcome::SkippedTooSmall { units } => {
                write!(f, "skipped, {} units is too small to trade", units)
            }
            SignalOutcome::MarketOpened {
                trade_id,
                units,
                price,
            } => write!(f, "market trade {} for {} units near {}", trade_id, units, price),
            SignalOutcome::MissedEntry {
                price,
                slippage_pips,
            } => write!(
                f,
                "missed entry, price {} is {} pips past the signal",
                price, slippage_pips
            ),
        }
    }
}

/// A strategy that turns signals into broker actions.
#[async_trait]
pub trait StrategyHandler: Send {
    fn name(&self) -> &'static str;

    /// Handle one signal to completion.
    async fn handle_signal(&mut self, signal: &Signal) -> EngineResult<SignalOutcome>;

    /// Pair lifecycle state, for strategies that keep one.
    fn pair_state(&self) -> Option<&PairStateStore> {
        None
    }

    /// Persist whatever must survive a restart. Best-effort.
    async fn shutdown(&mut self, db: &Database) -> bool;
}

/// Plain copy of the signal source: market orders, size times the multiplier.
pub struct CopyStrategy<B> {
    config: StrategyConfig,
    orders: OrderManager<B>,
    sizer: PositionSizer,
}

impl<B: Broker> CopyStrategy<B> {
    pub fn new(broker: B, config: StrategyConfig) -> Self {
        Self {
            sizer: PositionSizer::new(config.clone()),
            orders: OrderManager::new(broker),
            config,
        }
    }

    /// Adverse distance from the signal's open price, zero when better.
    fn slippage_pips(signal: &Signal, price: Decimal) -> Decimal {
        let adverse = match signal.side {
            TradeSide::Buy => price - signal.open_price,
            TradeSide::Sell => signal.open_price - price,
        };
        signal.pair.price_to_pips(adverse.max(Decimal::ZERO))
    }

    async fn open(&self, signal: &Signal) -> EngineResult<SignalOutcome> {
        let pair = &signal.pair;
        let price = self.orders.current_price(signal.side, pair).await?;
        let slippage_pips = Self::slippage_pips(signal, price);

        if slippage_pips > Decimal::from(self.config.max_entry_slippage_pips) {
            warn!(
                pair = %pair,
                price = %price,
                signal_price = %signal.open_price,
                slippage_pips = %slippage_pips,
                "Missed opportunity, price moved past the signal"
            );
            return Ok(SignalOutcome::MissedEntry {
                price,
                slippage_pips,
            });
        }

        let balance = self.orders.account_balance().await?;
        let units = self.sizer.broker_units(signal.size, balance);
        if units == 0 {
            warn!(pair = %pair, balance = %balance, "Signal size converts to zero units");
            return Ok(SignalOutcome::SkippedTooSmall { units });
        }

        let trade_id = self.orders.open_market_trade(signal.side, units, pair).await?;
        Ok(SignalOutcome::MarketOpened {
            trade_id,
            units,
            price,
        })
    }
}

#[async_trait]
impl<B: Broker + 'static> StrategyHandler for CopyStrategy<B> {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn handle_signal(&mut self, signal: &Signal) -> EngineResult<SignalOutcome> {
        signal.validate().map_err(EngineError::InvalidSignal)?;
        info!(signal = %signal, broker = self.orders.broker().name(), "Copying signal");

        match signal.action {
            SignalAction::Open => self.open(signal).await,
            SignalAction::Close => {
                let trades = self.orders.close_all_trades(&signal.pair).await?;
                Ok(SignalOutcome::Closed { trades, orders: 0 })
            }
        }
    }

    async fn shutdown(&mut self, _db: &Database) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BrokerCall, PaperBroker};
    use crate::models::CurrencyPair;
    use rust_decimal_macros::dec;

    fn signal(action: SignalAction, side: TradeSide, pair: &CurrencyPair, price: Decimal) -> Signal {
        Signal::new(action, side, 2, pair.clone(), price).unwrap()
    }

    #[tokio::test]
    async fn test_copy_opens_market_trade_within_slippage() {
        let paper = PaperBroker::new(dec!(10000));
        let eurusd = CurrencyPair::parse("EURUSD").unwrap();
        paper.set_price(&eurusd, dec!(1.1004)).await;

        let mut strategy = CopyStrategy::new(paper.clone(), StrategyConfig::default());
        let outcome = strategy
            .handle_signal(&signal(SignalAction::Open, TradeSide::Buy, &eurusd, dec!(1.1000)))
            .await
            .unwrap();

        assert_eq!(outcome.label(), "market_opened");
        assert_eq!(
            paper.mutations().await,
            vec![BrokerCall::OpenMarketTrade {
                side: TradeSide::Buy,
                units: 6000,
                pair: eurusd.clone(),
            }]
        );
    }

    #[tokio::test]
    async fn test_copy_takes_better_price() {
        let paper = PaperBroker::new(dec!(10000));
        let gbpusd = CurrencyPair::parse("GBPUSD").unwrap();
        paper.set_price(&gbpusd, dec!(1.2600)).await;

        let mut strategy = CopyStrategy::new(paper.clone(), StrategyConfig::default());
        let outcome = strategy
            .handle_signal(&signal(SignalAction::Open, TradeSide::Sell, &gbpusd, dec!(1.2500)))
            .await
            .unwrap();

        assert!(matches!(outcome, SignalOutcome::MarketOpened { units: 6000, .. }));
        assert_eq!(paper.trades_for(&gbpusd).await[0].units, -6000);
    }

    #[tokio::test]
    async fn test_copy_misses_entry_past_slippage() {
        let paper = PaperBroker::new(dec!(10000));
        let eurusd = CurrencyPair::parse("EURUSD").unwrap();
        paper.set_price(&eurusd, dec!(1.1006)).await;

        let mut strategy = CopyStrategy::new(paper.clone(), StrategyConfig::default());
        let outcome = strategy
            .handle_signal(&signal(SignalAction::Open, TradeSide::Buy, &eurusd, dec!(1.1000)))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SignalOutcome::MissedEntry {
                price: dec!(1.1006),
                slippage_pips: dec!(6),
            }
        );
        assert!(paper.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_copy_close_closes_every_trade() {
        let paper = PaperBroker::new(dec!(10000));
        let eurusd = CurrencyPair::parse("EURUSD").unwrap();
        paper.add_trade(&eurusd, 3000, dec!(1.1), None).await;
        paper.add_trade(&eurusd, 3000, dec!(1.1), None).await;

        let mut strategy = CopyStrategy::new(paper.clone(), StrategyConfig::default());
        let outcome = strategy
            .handle_signal(&signal(SignalAction::Close, TradeSide::Buy, &eurusd, dec!(1.1)))
            .await
            .unwrap();

        assert_eq!(outcome, SignalOutcome::Closed { trades: 2, orders: 0 });
        assert!(paper.trades_for(&eurusd).await.is_empty());
        assert!(strategy.pair_state().is_none());
    }

    #[test]
    fn test_outcome_labels_are_distinct() {
        let outcomes = [
            SignalOutcome::Closed { trades: 0, orders: 0 },
            SignalOutcome::IgnoredBlacklisted,
            SignalOutcome::StoppedOut,
            SignalOutcome::AwaitingFill { orders: 1 },
            SignalOutcome::SkippedTooSmall { units: 0 },
        ];
        let mut labels: Vec<_> = outcomes.iter().map(SignalOutcome::label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), outcomes.len());
    }
}
