//! Shared stop-loss negotiation when adding to an open pair.
//!
//! All trades on a pair share one stop-loss. Adding a trade raises the money at
//! risk, so the shared stop is walked one pip at a time toward the entries
//! until the aggregate loss, if every trade were stopped there, fits the risk
//! budget again.
//!
//! Per-trade loss only counts the adverse side of the entry: a stop beyond the
//! entry on the profit side contributes zero. Aggregate risk is therefore
//! non-increasing along the walk and reaches zero once the candidate passes
//! the furthest entry, which bounds the walk.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{BrokerTrade, CurrencyPair, TradeSide};

use super::{EngineError, EngineResult};

/// Position size and entry of one trade, for risk accounting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskExposure {
    pub open_price: Decimal,
    pub units: u64,
}

impl From<&BrokerTrade> for RiskExposure {
    fn from(trade: &BrokerTrade) -> Self {
        Self {
            open_price: trade.open_price,
            units: trade.abs_units(),
        }
    }
}

/// Everything the negotiation looks at for one add-to-position signal.
#[derive(Debug, Clone)]
pub struct NegotiationInput<'a> {
    pub pair: &'a CurrencyPair,
    pub side: TradeSide,
    pub trades: &'a [BrokerTrade],
    /// The trade about to be opened at market
    pub new_trade: RiskExposure,
    pub current_price: Decimal,
    pub balance: Decimal,
    /// Account currency per pip for one unit
    pub per_pip: Decimal,
}

/// Why a found stop-loss cannot be used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClashReason {
    /// The market is already past the candidate
    Crossed,
    /// The candidate is closer to the market than the minimum gap
    TooClose { gap_pips: Decimal },
}

impl fmt::Display for ClashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClashReason::Crossed => f.write_str("already crossed by the market"),
            ClashReason::TooClose { gap_pips } => write!(f, "only {} pips from the market", gap_pips),
        }
    }
}

/// Result of a negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    /// Apply `stop_loss` to every trade, old and new.
    Agreed {
        stop_loss: Decimal,
        previous: Decimal,
        steps: u64,
    },
    /// Leave everything untouched.
    Clash {
        previous: Decimal,
        candidate: Decimal,
        reason: ClashReason,
    },
}

/// Finds a shared stop-loss within the risk budget.
#[derive(Debug, Clone)]
pub struct StopLossNegotiator {
    risk_pct: Decimal,
    min_gap_pips: Decimal,
}

impl StopLossNegotiator {
    pub fn new(risk_pct: Decimal, min_gap_pips: u32) -> Self {
        Self {
            risk_pct,
            min_gap_pips: Decimal::from(min_gap_pips),
        }
    }

    /// The single stop-loss all open trades carry.
    ///
    /// Differing or missing stops mean the account was changed behind the
    /// engine's back.
    pub fn shared_stop_loss(pair: &CurrencyPair, trades: &[BrokerTrade]) -> EngineResult<Decimal> {
        let mut shared: Option<Decimal> = None;

        for trade in trades {
            let stop = trade.stop_loss.ok_or_else(|| {
                EngineError::Consistency(format!("trade {} on {} has no stop-loss", trade.id, pair))
            })?;
            match shared {
                None => shared = Some(stop),
                Some(s) if s != stop => {
                    return Err(EngineError::Consistency(format!(
                        "not all stop-losses of {} are the same ({} vs {})",
                        pair, s, stop
                    )))
                }
                Some(_) => {}
            }
        }

        shared.ok_or_else(|| EngineError::Consistency(format!("no open trades on {}", pair)))
    }

    /// Percentage of `balance` lost if every exposure is stopped at `candidate`.
    pub fn aggregate_risk_pct(
        pair: &CurrencyPair,
        side: TradeSide,
        exposures: &[RiskExposure],
        candidate: Decimal,
        balance: Decimal,
        per_pip: Decimal,
    ) -> Decimal {
        if balance <= Decimal::ZERO {
            return Decimal::MAX;
        }

        let total: Decimal = exposures
            .iter()
            .map(|e| {
                let adverse = match side {
                    TradeSide::Buy => e.open_price - candidate,
                    TradeSide::Sell => candidate - e.open_price,
                };
                let pips = pair.price_to_pips(adverse.max(Decimal::ZERO));
                pips * per_pip * Decimal::from(e.units)
            })
            .sum();

        total / balance * dec!(100)
    }

    /// Walk the shared stop toward the entries until the budget is met, then
    /// check it against the market.
    pub fn negotiate(&self, input: &NegotiationInput<'_>) -> EngineResult<Negotiation> {
        let pair = input.pair;
        let previous = Self::shared_stop_loss(pair, input.trades)?;

        let mut exposures: Vec<RiskExposure> = input.trades.iter().map(RiskExposure::from).collect();
        exposures.push(input.new_trade);

        let step = match input.side {
            TradeSide::Buy => pair.pip_size(),
            TradeSide::Sell => -pair.pip_size(),
        };
        let max_steps = Self::steps_to_breakeven(pair, input.side, &exposures, previous);

        let risk_at = |candidate: Decimal| {
            Self::aggregate_risk_pct(
                pair,
                input.side,
                &exposures,
                candidate,
                input.balance,
                input.per_pip,
            )
        };

        let mut candidate = previous;
        let mut steps = 0u64;
        while risk_at(candidate) > self.risk_pct && steps < max_steps {
            candidate += step;
            steps += 1;
        }

        if let Some(reason) = self.clash(pair, input.side, candidate, input.current_price) {
            return Ok(Negotiation::Clash {
                previous,
                candidate,
                reason,
            });
        }

        Ok(Negotiation::Agreed {
            stop_loss: pair.round_price(candidate),
            previous,
            steps,
        })
    }

    /// Pips from `start` to the furthest entry; past it every loss is zero.
    fn steps_to_breakeven(
        pair: &CurrencyPair,
        side: TradeSide,
        exposures: &[RiskExposure],
        start: Decimal,
    ) -> u64 {
        let furthest = match side {
            TradeSide::Buy => exposures.iter().map(|e| e.open_price).max(),
            TradeSide::Sell => exposures.iter().map(|e| e.open_price).min(),
        };
        let Some(furthest) = furthest else {
            return 0;
        };

        let distance = match side {
            TradeSide::Buy => furthest - start,
            TradeSide::Sell => start - furthest,
        };
        pair.price_to_pips(distance.max(Decimal::ZERO))
            .ceil()
            .to_u64()
            .unwrap_or(0)
    }

    fn clash(
        &self,
        pair: &CurrencyPair,
        side: TradeSide,
        candidate: Decimal,
        current_price: Decimal,
    ) -> Option<ClashReason> {
        let crossed = match side {
            TradeSide::Buy => candidate > current_price,
            TradeSide::Sell => candidate < current_price,
        };
        if crossed {
            return Some(ClashReason::Crossed);
        }

        let gap_pips = pair.price_to_pips((current_price - candidate).abs());
        if gap_pips < self.min_gap_pips {
            return Some(ClashReason::TooClose { gap_pips });
        }
        None
    }
}
