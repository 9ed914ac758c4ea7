//! Bridge runner: feeds signals to the strategy handler one at a time.
//!
//! Handles:
//! - Building the broker and strategy handler from configuration
//! - Reading JSON-line signals until the stream ends or Ctrl+C
//! - Journaling every outcome
//! - Stopping on fatal engine errors
//! - Saving pair state on the way out

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

use crate::api::{Broker, DryRunBroker, OandaClient, OandaConfig};
use crate::db::Database;
use crate::models::Signal;
use crate::trading::{
    CopyStrategy, EngineError, SignalOutcome, SmartCopyEngine, StrategyConfig, StrategyHandler,
    StrategyKind,
};

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub strategy: StrategyKind,

    /// Log broker mutations instead of sending them
    pub dry_run: bool,

    pub strategy_config: StrategyConfig,
}

/// Build the configured strategy on top of `broker`.
pub async fn build_handler<B: Broker + 'static>(
    broker: B,
    kind: StrategyKind,
    config: StrategyConfig,
    db: &Database,
) -> Result<Box<dyn StrategyHandler>> {
    let handler: Box<dyn StrategyHandler> = match kind {
        StrategyKind::Smart => Box::new(
            SmartCopyEngine::load(broker, config, db)
                .await
                .context("Failed to load pair state")?,
        ),
        StrategyKind::Copy => Box::new(CopyStrategy::new(broker, config)),
    };
    Ok(handler)
}

/// Counters for one bridge session.
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    pub handled: u64,
    pub failed: u64,
    pub rejected: u64,
    pub outcomes: BTreeMap<&'static str, u64>,
}

impl BridgeStats {
    fn record(&mut self, outcome: &SignalOutcome) {
        self.handled += 1;
        *self.outcomes.entry(outcome.label()).or_default() += 1;
    }
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Session Statistics ===")?;
        writeln!(f, "Handled:   {}", self.handled)?;
        writeln!(f, "Failed:    {}", self.failed)?;
        writeln!(f, "Rejected:  {}", self.rejected)?;
        for (label, count) in &self.outcomes {
            writeln!(f, "  {:<20} {}", label, count)?;
        }
        Ok(())
    }
}

/// Main bridge runner.
pub struct Bridge {
    db: Database,
    handler: Box<dyn StrategyHandler>,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(db: Database, handler: Box<dyn StrategyHandler>) -> Self {
        Self {
            db,
            handler,
            stats: BridgeStats::default(),
        }
    }

    /// Connect to Oanda and build the configured handler.
    pub async fn connect(config: &BridgeConfig, db: Database) -> Result<Self> {
        let oanda = OandaClient::new(&OandaConfig::from_env()?)?;

        let handler = if config.dry_run {
            build_handler(
                DryRunBroker::new(oanda),
                config.strategy,
                config.strategy_config.clone(),
                &db,
            )
            .await?
        } else {
            build_handler(oanda, config.strategy, config.strategy_config.clone(), &db).await?
        };

        info!(
            strategy = handler.name(),
            dry_run = config.dry_run,
            risk_pct = %config.strategy_config.account_risk_pct(),
            "Bridge initialized"
        );
        Ok(Self::new(db, handler))
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn handler(&self) -> &dyn StrategyHandler {
        self.handler.as_ref()
    }

    /// Handle one signal and journal the result.
    ///
    /// Recoverable failures are logged and yield `Ok(None)`. Fatal engine
    /// errors are returned; the caller must stop feeding signals.
    pub async fn handle_one(&mut self, signal: &Signal) -> Result<Option<SignalOutcome>> {
        let result = self.handler.handle_signal(signal).await;
        match result {
            Ok(outcome) => {
                info!(signal = %signal, outcome = %outcome, "Signal handled");
                self.stats.record(&outcome);
                self.journal(signal, outcome.label(), None, false).await;
                Ok(Some(outcome))
            }
            Err(e) if e.is_fatal() => {
                error!(signal = %signal, error = %e, "Fatal error, no further signals will be handled");
                self.stats.failed += 1;
                self.journal(signal, "fatal", Some(&e.to_string()), true).await;
                Err(anyhow::Error::new(e).context(format!("Fatal error handling {}", signal)))
            }
            Err(e) => {
                match &e {
                    EngineError::InvalidSignal(_) => warn!(signal = %signal, error = %e, "Signal rejected"),
                    _ => error!(signal = %signal, error = %e, "Signal failed, pair state unchanged"),
                }
                self.stats.failed += 1;
                self.journal(signal, "failed", Some(&e.to_string()), false).await;
                Ok(None)
            }
        }
    }

    /// Parse and handle one input line. Unparsable lines are skipped.
    pub async fn process_line(&mut self, line: &str) -> Result<Option<SignalOutcome>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let signal = match Signal::from_json_line(line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(line = %line.trim(), error = %e, "Ignoring malformed signal");
                self.stats.rejected += 1;
                return Ok(None);
            }
        };

        self.handle_one(&signal).await
    }

    /// Consume signals until the input ends, Ctrl+C, or a fatal error.
    ///
    /// Pair state is saved in every case.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        info!(strategy = self.handler.name(), "Waiting for signals");
        let mut lines = input.lines();

        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Err(e) = self.process_line(&line).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => {
                        info!("Signal input closed");
                        break Ok(());
                    }
                    Err(e) => break Err(anyhow::Error::new(e).context("Failed to read signal input")),
                },
            }
        };

        self.shutdown().await;
        result
    }

    /// Persist handler state. Failure is logged; returns whether it was saved.
    pub async fn shutdown(&mut self) -> bool {
        info!("Shutting down bridge...");
        let saved = self.handler.shutdown(&self.db).await;
        if saved {
            info!("Bridge shutdown complete");
        } else {
            warn!("Bridge shut down without saving; last saved state will be used on restart");
        }
        saved
    }

    async fn journal(&self, signal: &Signal, outcome: &str, error: Option<&str>, fatal: bool) {
        if let Err(e) = self.db.record_signal(signal, outcome, error, fatal).await {
            warn!(error = %format!("{:#}", e), "Failed to journal signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperBroker;
    use crate::models::CurrencyPair;
    use crate::trading::{PairStateStore, PairStatus};
    use rust_decimal_macros::dec;

    fn pair(code: &str) -> CurrencyPair {
        CurrencyPair::parse(code).unwrap()
    }

    async fn smart_bridge(paper: &PaperBroker, store: PairStateStore) -> Bridge {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let engine = SmartCopyEngine::new(paper.clone(), StrategyConfig::default(), store);
        Bridge::new(db, Box::new(engine))
    }

    #[tokio::test]
    async fn test_run_handles_stream_and_saves_state() {
        let paper = PaperBroker::new(dec!(10000));
        let mut bridge = smart_bridge(&paper, PairStateStore::default()).await;

        let input = concat!(
            r#"{"action":"OPEN","side":"BUY","size":2,"pair":"EURUSD","open_price":"1.1000"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"action":"OPEN","side":"SELL","size":1,"pair":"GBP_USD","open_price":"1.2500"}"#,
            "\n",
        );
        bridge.run(input.as_bytes()).await.unwrap();

        let stats = bridge.stats();
        assert_eq!(stats.handled, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.outcomes.get("order_created"), Some(&2));

        let reloaded = PairStateStore::load(&bridge.db).await.unwrap();
        assert_eq!(reloaded.status(&pair("EURUSD")), PairStatus::Open);
        assert_eq!(reloaded.status(&pair("GBPUSD")), PairStatus::Open);

        let journal = bridge.db.get_recent_signals(10).await.unwrap();
        assert_eq!(journal.len(), 2);
    }

    #[tokio::test]
    async fn test_broker_failure_does_not_stop_the_stream() {
        let paper = PaperBroker::new(dec!(10000));
        paper.fail_on("create_limit_order").await;
        let mut bridge = smart_bridge(&paper, PairStateStore::default()).await;

        let input = concat!(
            r#"{"action":"OPEN","side":"BUY","size":2,"pair":"EURUSD","open_price":"1.1000"}"#,
            "\n",
            r#"{"action":"OPEN","side":"BUY","size":2,"pair":"AUDUSD","open_price":"0.7000"}"#,
            "\n",
        );
        bridge.run(input.as_bytes()).await.unwrap();

        assert_eq!(bridge.stats().failed, 1);
        assert_eq!(bridge.stats().handled, 1);

        let state = bridge.handler().pair_state().unwrap();
        assert_eq!(state.status(&pair("EURUSD")), PairStatus::Fresh);
        assert_eq!(state.status(&pair("AUDUSD")), PairStatus::Open);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_run_but_state_is_saved() {
        let paper = PaperBroker::new(dec!(10000));
        let eurusd = pair("EURUSD");
        paper.set_price(&eurusd, dec!(1.1050)).await;
        paper.add_trade(&eurusd, 3000, dec!(1.1000), Some(dec!(1.0500))).await;
        paper.add_trade(&eurusd, 3000, dec!(1.1020), Some(dec!(1.0600))).await;

        let mut store = PairStateStore::default();
        store.mark_open(&eurusd).unwrap();
        let mut bridge = smart_bridge(&paper, store).await;

        let input = concat!(
            r#"{"action":"OPEN","side":"BUY","size":1,"pair":"EURUSD","open_price":"1.1040"}"#,
            "\n",
            r#"{"action":"OPEN","side":"BUY","size":1,"pair":"AUDUSD","open_price":"0.7000"}"#,
            "\n",
        );
        let err = bridge.run(input.as_bytes()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("consistency violation"));

        // The second signal was never handled.
        assert!(paper.mutations().await.is_empty());

        let journal = bridge.db.get_recent_signals(10).await.unwrap();
        assert_eq!(journal.len(), 1);
        assert!(journal[0].fatal);

        let reloaded = PairStateStore::load(&bridge.db).await.unwrap();
        assert_eq!(reloaded.status(&eurusd), PairStatus::Open);
    }

    #[tokio::test]
    async fn test_copy_strategy_keeps_no_state() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let paper = PaperBroker::new(dec!(10000));
        let handler = build_handler(paper, StrategyKind::Copy, StrategyConfig::default(), &db)
            .await
            .unwrap();
        let mut bridge = Bridge::new(db, handler);

        assert_eq!(bridge.handler().name(), "copy");
        assert!(bridge.handler().pair_state().is_none());
        assert!(bridge.shutdown().await);
    }
}
