use crate::classifier::{ClassifierChain, SignalOutcome};
use crate::config::BacktestConfig;
use crate::market_data::{BarStore, MarketDataProvider};
use crate::models::SignalAction;
use crate::paper_trading::{CycleStatus, PaperTradingSystem};
use crate::quotes::QuoteClient;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub struct PaperArgs {
    pub data_file: PathBuf,
    pub tickers: Vec<String>,
    pub quote_url: String,
    pub interval_secs: u64,
    pub cycles: Option<u32>,
    pub capital: Option<f64>,
}

pub async fn run(args: PaperArgs) -> Result<()> {
    if args.tickers.is_empty() {
        anyhow::bail!("at least one ticker is required for paper trading");
    }

    let store = BarStore::load(&args.data_file)
        .with_context(|| format!("loading market data from {}", args.data_file.display()))?;
    let chain = ClassifierChain::standard();

    let mut parameters: HashMap<String, f64> = HashMap::new();
    if let Some(capital) = args.capital {
        parameters.insert("initialCapital".to_string(), capital);
    }
    let config = BacktestConfig::from_parameters(&parameters);

    let api_key = std::env::var("QUOTE_API_KEY").ok();
    let quotes = QuoteClient::new(&args.quote_url, api_key.as_deref())?;
    let mut trader = PaperTradingSystem::new(config.risk.clone(), config.exit_rules.clone(), quotes);

    info!(
        "Paper trading {} ticker(s) every {}s against {}",
        args.tickers.len(),
        args.interval_secs,
        args.quote_url
    );

    let mut cycle = 0u32;
    let mut last_day = Utc::now().date_naive();
    loop {
        cycle += 1;
        let today = Utc::now().date_naive();
        if today != last_day {
            trader.reset_daily_stats();
            last_day = today;
        }
        info!("Cycle {} at {}", cycle, Utc::now().format("%Y-%m-%d %H:%M:%S"));

        for ticker in &args.tickers {
            let signal = match latest_signal(&store, &chain, ticker, config.period_days) {
                Ok(signal) => signal,
                Err(error) => {
                    warn!("No signal for {}: {}", ticker, error);
                    continue;
                }
            };
            info!("{}: signal {}", ticker, signal.as_str());

            let outcome = trader.run_live_cycle(ticker, signal).await;
            match outcome.status {
                CycleStatus::Executed => info!(
                    "{}: {} at {:.2} x{}",
                    ticker,
                    outcome.action.unwrap_or("?"),
                    outcome.price.unwrap_or(0.0),
                    outcome.quantity.unwrap_or(0)
                ),
                _ => info!(
                    "{}: {} ({})",
                    ticker,
                    outcome.status.as_str(),
                    outcome.reason.as_deref().unwrap_or("no reason")
                ),
            }
        }

        for stop in trader.check_stop_losses().await {
            info!(
                "Exit triggered: {} at {:.2} (P&L {:.2}, {})",
                stop.ticker,
                stop.price.unwrap_or(0.0),
                stop.pnl.unwrap_or(0.0),
                stop.reason.as_deref().unwrap_or("?")
            );
        }

        let status = trader.get_portfolio_status();
        info!(
            "Portfolio: capital {:.2} (peak {:.2}), total P&L {:.2} ({:+.2}%), drawdown {:.2}%, {} open position(s)",
            status.current_capital,
            status.peak_capital,
            status.total_pnl,
            status.total_return_pct,
            status.current_drawdown_pct,
            trader.open_position_count()
        );
        if status.max_drawdown_exceeded {
            warn!("Max drawdown exceeded; new entries are blocked");
        }
        if status.daily_loss_exceeded {
            warn!("Daily loss limit exceeded; trading stops for the day");
        }

        if let Some(max_cycles) = args.cycles {
            if cycle >= max_cycles {
                break;
            }
        }

        // Cancellation is cooperative and lands between cycles.
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping paper trader");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(args.interval_secs)) => {}
        }
    }

    let status = trader.get_portfolio_status();
    info!(
        "Final: {:.2} -> {:.2} over {} trade(s)",
        status.initial_capital, status.current_capital, status.total_trades
    );
    Ok(())
}

/// Train on the ticker's full labeled history and predict the most recent
/// bar, the way the batch engine predicts its test partition.
fn latest_signal(
    store: &BarStore,
    chain: &ClassifierChain,
    ticker: &str,
    period_days: usize,
) -> Result<SignalAction> {
    let bars = store.bars(ticker, period_days)?;
    let trained = chain.train(ticker, &bars)?;
    let latest = bars.last().context("bar series is empty")?;
    match trained.predict_bar(latest) {
        SignalOutcome::Signal(action) => Ok(action),
        SignalOutcome::NoSignal => {
            anyhow::bail!("latest bar is missing indicator columns")
        }
    }
}
