//! Broker access: the trait the engine trades through and its implementations.

mod broker;
mod dry_run;
mod oanda_client;
#[cfg(test)]
mod paper_broker;
mod types;

pub use broker::Broker;
pub use dry_run::DryRunBroker;
pub use oanda_client::{OandaClient, OandaConfig};
#[cfg(test)]
pub use paper_broker::{BrokerCall, PaperBroker};
