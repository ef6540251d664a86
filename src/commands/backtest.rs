use crate::cache::SignalCache;
use crate::config::BacktestConfig;
use crate::engine::BacktestEngine;
use crate::market_data::BarStore;
use crate::models::BacktestReport;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct BacktestArgs {
    pub data_file: PathBuf,
    pub tickers: Vec<String>,
    pub capital: Option<f64>,
    pub position_size: Option<f64>,
    pub stop_loss: Option<f64>,
    pub cost: Option<f64>,
    pub period_days: Option<usize>,
    pub output: Option<PathBuf>,
}

pub async fn run(args: BacktestArgs) -> Result<()> {
    let store = BarStore::load(&args.data_file)
        .with_context(|| format!("loading market data from {}", args.data_file.display()))?;

    let tickers = if args.tickers.is_empty() {
        info!("No tickers given; backtesting the whole snapshot");
        store.tickers()
    } else {
        args.tickers.clone()
    };

    let mut parameters: HashMap<String, f64> = HashMap::new();
    if let Some(capital) = args.capital {
        parameters.insert("initialCapital".to_string(), capital);
    }
    if let Some(position_size) = args.position_size {
        parameters.insert("maxPositionSizeRatio".to_string(), position_size);
    }
    if let Some(stop_loss) = args.stop_loss {
        parameters.insert("stopLossRatio".to_string(), stop_loss);
    }
    if let Some(cost) = args.cost {
        parameters.insert("costRate".to_string(), cost);
    }
    if let Some(period_days) = args.period_days {
        parameters.insert("periodDays".to_string(), period_days as f64);
    }
    let config = BacktestConfig::from_parameters(&parameters);

    let engine =
        BacktestEngine::new(config, Arc::new(store)).with_cache(SignalCache::new());
    let status = engine.status_handle();

    let pb = ProgressBar::new(tickers.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let run_tickers = tickers.clone();
    let mut handle = tokio::task::spawn_blocking(move || engine.run_backtest(&run_tickers));
    let report = loop {
        tokio::select! {
            result = &mut handle => {
                break result.context("backtest worker panicked")??;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                let snapshot = status.snapshot();
                pb.set_position(snapshot.completed_tickers as u64);
                pb.set_message(snapshot.phase);
            }
        }
    };
    pb.finish_and_clear();

    print_report(&report);

    if let Some(output) = &args.output {
        write_report(&report, output)?;
        info!("Report written to {}", output.display());
    }

    Ok(())
}

fn print_report(report: &BacktestReport) {
    info!(
        "Capital: {:.2} -> {:.2} ({} daily snapshots)",
        report.initial_capital,
        report.final_capital,
        report.portfolio_history.len()
    );
    info!(
        "Metrics: total return {:.2}%, CAGR {:.2}%, Sharpe {:.2}, max drawdown {:.2}%",
        report.metrics.total_return_pct,
        report.metrics.cagr_pct,
        report.metrics.sharpe_ratio,
        report.metrics.max_drawdown_pct
    );
    info!(
        "Trades: {} total, win rate {:.1}%, avg gain {:.2}%, avg loss {:.2}%, best {:.2}%, worst {:.2}%",
        report.trade_summary.total_trades,
        report.trade_summary.win_rate_pct,
        report.trade_summary.avg_gain_pct,
        report.trade_summary.avg_loss_pct,
        report.trade_summary.best_trade_pct,
        report.trade_summary.worst_trade_pct
    );
    info!(
        "Diagnostics: {} test bars, predictions BUY {} / HOLD {} / SELL {}",
        report.diagnostics.test_slice_length,
        report.diagnostics.predicted_signal_counts.buy,
        report.diagnostics.predicted_signal_counts.hold,
        report.diagnostics.predicted_signal_counts.sell
    );
    for skip in &report.diagnostics.skipped_tickers {
        warn!("Skipped {}: {}", skip.ticker, skip.reason);
    }
}

fn write_report(report: &BacktestReport, output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing report")?;
    std::fs::write(output, json)
        .with_context(|| format!("writing report to {}", output.display()))
}
