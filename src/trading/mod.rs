//! Trading logic: pair state, sizing, stop-loss negotiation, strategies.

mod config;
mod copy_engine;
mod error;
mod orders;
mod pair_state;
mod position_sizer;
mod stop_loss;
mod strategy;

pub use config::{StrategyConfig, StrategyKind};
pub use copy_engine::SmartCopyEngine;
pub use error::{EngineError, EngineResult};
pub use orders::OrderManager;
pub use pair_state::{PairStateStore, PairStatus, PersistedPairState, BLACKLIST_KEY, CURRENTLY_OPEN_KEY};
pub use position_sizer::PositionSizer;
pub use stop_loss::{ClashReason, Negotiation, NegotiationInput, RiskExposure, StopLossNegotiator};
pub use strategy::{CopyStrategy, SignalOutcome, StrategyHandler};
