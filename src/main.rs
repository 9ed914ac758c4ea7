//! C2 to Oanda signal bridge
//!
//! Mirrors forex signals from a Collective2 strategy onto an Oanda account,
//! keeping the money at risk on each pair within a fixed share of equity.

mod api;
mod bridge;
mod db;
mod models;
mod trading;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::io::BufReader;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bridge::{Bridge, BridgeConfig};
use crate::db::Database;
use crate::models::{CurrencyPair, Signal, SignalAction, TradeSide};
use crate::trading::{PairStateStore, PairStatus, StrategyConfig, StrategyKind};

/// C2 to Oanda signal bridge CLI.
#[derive(Parser)]
#[command(name = "c2-oanda-bridge")]
#[command(about = "Mirror C2 forex signals onto an Oanda account", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "BRIDGE_DATABASE_URL", default_value = "sqlite:./c2_oanda_bridge.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the commands that trade.
#[derive(Args, Debug, Clone)]
struct TradingArgs {
    /// Strategy handling the signals
    #[arg(short, long, value_enum, default_value_t = StrategyKind::Smart)]
    strategy: StrategyKind,

    /// Dry run (log broker mutations, send nothing)
    #[arg(long)]
    dry_run: bool,

    /// Multiplier applied to the signal source's position size
    #[arg(short, long)]
    multiplier: Option<u32>,

    /// Signal source drawdown (percent) at which positions are stopped out
    #[arg(short, long)]
    risk: Option<Decimal>,
}

impl TradingArgs {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut strategy_config = StrategyConfig::default();
        if let Some(multiplier) = self.multiplier {
            if multiplier == 0 {
                bail!("multiplier must be at least 1");
            }
            strategy_config.position_size_multiplier = multiplier;
        }
        if let Some(risk) = self.risk {
            if risk <= Decimal::ZERO {
                bail!("risk percentage must be positive");
            }
            strategy_config.source_stop_loss_pct = risk;
        }

        Ok(BridgeConfig {
            strategy: self.strategy,
            dry_run: self.dry_run,
            strategy_config,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Handle JSON-line signals from stdin until EOF or Ctrl+C
    Run {
        #[command(flatten)]
        trading: TradingArgs,
    },

    /// Handle a single signal given on the command line
    Signal {
        /// OPEN or CLOSE
        #[arg(value_parser = parse_action)]
        action: SignalAction,

        /// BUY or SELL
        #[arg(value_parser = parse_side)]
        side: TradeSide,

        /// Position size in the signal source's lots
        size: u32,

        /// Currency pair, e.g. EURUSD or EUR_USD
        pair: CurrencyPair,

        /// Signal source's open price
        open_price: Decimal,

        #[command(flatten)]
        trading: TradingArgs,
    },

    /// Show currently open and blacklisted pairs
    State,

    /// Release a blacklisted pair after manual review
    Unblacklist {
        /// Currency pair to release
        pair: CurrencyPair,
    },

    /// Show current configuration
    Config,

    /// Show signal journal statistics
    Status,
}

fn parse_action(raw: &str) -> Result<SignalAction, String> {
    match raw.to_ascii_uppercase().as_str() {
        "OPEN" => Ok(SignalAction::Open),
        "CLOSE" => Ok(SignalAction::Close),
        other => Err(format!("unknown action {:?}, expected OPEN or CLOSE", other)),
    }
}

fn parse_side(raw: &str) -> Result<TradeSide, String> {
    match raw.to_ascii_uppercase().as_str() {
        "BUY" => Ok(TradeSide::Buy),
        "SELL" => Ok(TradeSide::Sell),
        other => Err(format!("unknown side {:?}, expected BUY or SELL", other)),
    }
}

fn join_pairs<'a>(pairs: impl Iterator<Item = &'a CurrencyPair>) -> String {
    let joined = pairs.map(CurrencyPair::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize database
    let db = Database::new(&cli.database).await?;

    match cli.command {
        Commands::Run { trading } => {
            let config = trading.bridge_config()?;
            info!(
                strategy = %config.strategy,
                dry_run = config.dry_run,
                "Starting signal bridge"
            );

            let mut bridge = Bridge::connect(&config, db).await?;

            println!("\n=== C2 -> Oanda Signal Bridge ===");
            println!("Strategy: {}", config.strategy);
            println!("Mode: {}", if config.dry_run { "DRY RUN (no real orders)" } else { "LIVE TRADING" });
            println!("Reading JSON-line signals from stdin. Press Ctrl+C to stop.\n");

            let result = bridge.run(BufReader::new(tokio::io::stdin())).await;
            println!("\n{}", bridge.stats());
            result?;
        }

        Commands::Signal {
            action,
            side,
            size,
            pair,
            open_price,
            trading,
        } => {
            let signal = Signal::new(action, side, size, pair, open_price).map_err(anyhow::Error::msg)?;
            let config = trading.bridge_config()?;

            let mut bridge = Bridge::connect(&config, db).await?;
            let result = bridge.handle_one(&signal).await;
            bridge.shutdown().await;

            match result? {
                Some(outcome) => println!("{}: {}", signal, outcome),
                None => println!("{}: failed, see log", signal),
            }
        }

        Commands::State => {
            let store = PairStateStore::load(&db).await?;

            println!("\n=== Pair State ===");
            println!("Currently open: {}", join_pairs(store.currently_open()));
            println!("Blacklisted:    {}", join_pairs(store.blacklisted()));
        }

        Commands::Unblacklist { pair } => {
            let mut store = PairStateStore::load(&db).await?;

            match store.status(&pair) {
                PairStatus::Blacklisted => {
                    store.clear(&pair)?;
                    if !store.save(&db).await {
                        bail!("Failed to save pair state");
                    }
                    info!(pair = %pair, "Pair released from blacklist");
                    println!("{} released; the next OPEN signal starts a fresh position.", pair);
                }
                status => println!("{} is not blacklisted (state: {}).", pair, status),
            }
        }

        Commands::Config => {
            let strategy = StrategyConfig::default();

            println!("\n=== Strategy Configuration ===\n");
            println!("Sizing:");
            println!("  Units per Source Lot:   {}", strategy.units_per_source_lot);
            println!("  Source Reference Equity: {}", strategy.source_reference_equity);
            println!("  Size Multiplier:        {}x", strategy.position_size_multiplier);

            println!("\nRisk:");
            println!("  Source Stop-Loss:       {}%", strategy.source_stop_loss_pct);
            println!("  Account Risk per Pair:  {}%", strategy.account_risk_pct());

            println!("\nEntry:");
            println!("  Limit Order Offset:     {} pips", strategy.limit_order_offset_pips);
            println!("  Add-Trade Min Gap:      {} pips", strategy.add_trade_min_gap_pips);
            println!("  Max Entry Slippage:     {} pips (copy strategy)", strategy.max_entry_slippage_pips);
        }

        Commands::Status => {
            let stats = db.get_signal_stats().await?;
            let recent = db.get_recent_signals(10).await?;
            let store = PairStateStore::load(&db).await?;

            println!("\n=== Signal Journal ===");
            if stats.is_empty() {
                println!("No signals handled yet. Use 'c2-oanda-bridge run' to start.");
            }
            for row in &stats {
                println!("  {:<20} {:>6}", row.outcome, row.count);
            }

            if !recent.is_empty() {
                println!("\n=== Recent Signals ===");
                for s in &recent {
                    println!(
                        "  {} {:<5} {:<4} {} x{} @ {} -> {}{}",
                        s.received_at,
                        s.action,
                        s.side,
                        s.pair,
                        s.size,
                        s.open_price,
                        s.outcome,
                        s.error_message
                            .as_deref()
                            .map(|e| format!(" ({})", e))
                            .unwrap_or_default()
                    );
                }
            }

            println!("\n=== Pair State ===");
            println!("Currently open: {}", join_pairs(store.currently_open()));
            println!("Blacklisted:    {}", join_pairs(store.blacklisted()));
        }
    }

    Ok(())
}
