use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use herald_core::config::DEFAULT_LOG_FILTER;
use herald_core::{DispatchMode, FailurePolicy, HeraldConfig};
use herald_events::CallbackTarget;
use tracing::{info, warn};

mod stock;

use stock::{price_changed_signature, price_logger, Stock, ThresholdAlert};

#[derive(Parser)]
#[command(name = "herald", author, version, about = "Typed multicast events")]
struct Cli {
    /// Config file. Falls back to HERALD_CONFIG, then ~/.herald/herald.toml
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a price feed through a stock's PriceChanged event
    Ticker(TickerArgs),
}

#[derive(Args)]
struct TickerArgs {
    #[arg(long, default_value = "MSFT")]
    symbol: String,

    /// Comma-separated prices, applied in order
    #[arg(long, value_delimiter = ',', required = true)]
    prices: Vec<f64>,

    /// Overrides `mode` from the config file
    #[arg(long)]
    mode: Option<ModeArg>,

    /// Overrides `dispatch.failure` from the config file
    #[arg(long)]
    failure: Option<FailureArg>,

    /// Warn when the price rises above this value
    #[arg(long)]
    alert_above: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Sync,
    Async,
}

impl From<ModeArg> for DispatchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Sync => DispatchMode::Sync,
            ModeArg::Async => DispatchMode::Async,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FailureArg {
    BestEffort,
    FailFast,
}

impl From<FailureArg> for FailurePolicy {
    fn from(f: FailureArg) -> Self {
        match f {
            FailureArg::BestEffort => FailurePolicy::BestEffort,
            FailureArg::FailFast => FailurePolicy::FailFast,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // explicit path > HERALD_CONFIG env > ~/.herald/herald.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("HERALD_CONFIG").ok());
    let loaded = HeraldConfig::load(config_path.as_deref());

    let default_filter = loaded
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        HeraldConfig::default()
    });

    match cli.command {
        Command::Ticker(args) => run_ticker(args, config).await,
    }
}

async fn run_ticker(args: TickerArgs, config: HeraldConfig) -> anyhow::Result<()> {
    let mut policy = config.dispatch;
    if let Some(failure) = args.failure {
        policy.failure = failure.into();
    }
    let mode = args.mode.map(DispatchMode::from).unwrap_or(config.mode);
    info!(symbol = %args.symbol, ?mode, ?policy, "starting ticker");

    let mut stock = Stock::new(&args.symbol, policy, mode)?;
    stock.on_price_changed(price_logger(stock.symbol()))?;

    // Held here; the subscription only has a weak reference.
    let alert = args.alert_above.map(|limit| Arc::new(ThresholdAlert::new(limit)));
    if let Some(alert) = &alert {
        stock.on_price_changed(CallbackTarget::weak("threshold-alert", price_changed_signature(), alert))?;
    }

    for price in args.prices {
        match stock.set_price(price).await {
            Ok(Some(report)) => println!("{}", serde_json::to_string(&report)?),
            Ok(None) => info!(symbol = %stock.symbol(), price, "price unchanged, nothing fired"),
            Err(e) => warn!(code = e.code(), error = %e, "PriceChanged dispatch failed"),
        }
    }

    info!(
        symbol = %stock.symbol(),
        price = stock.price(),
        alerts = alert.as_ref().map_or(0, |a| a.hits()),
        "feed finished"
    );
    Ok(())
}
