use crate::cache::SignalCache;
use crate::classifier::{ClassifierChain, SignalForecast};
use crate::config::BacktestConfig;
use crate::error::EngineError;
use crate::market_data::MarketDataProvider;
use crate::metrics::MetricsEngine;
use crate::models::{
    round2, BacktestReport, Bar, Diagnostics, PortfolioSnapshot, SignalAction, TickerSkip,
    TradeRecord, TradeResult,
};
use crate::position::Position;
use crate::risk::{RiskManager, SizingOutcome};
use crate::status::RunStatus;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

struct ForecastTask {
    ticker: String,
    bars: Vec<Bar>,
}

struct ForecastResultMsg {
    ticker: String,
    run: Result<SignalForecast, EngineError>,
}

/// Orchestrates a batch simulation: per-instrument train/test split,
/// classifier forecasting, then a strictly sequential day-by-day replay that
/// owns every Position it creates and routes all capital mutations through
/// one RiskManager.
pub struct BacktestEngine {
    config: BacktestConfig,
    provider: Arc<dyn MarketDataProvider>,
    chain: Arc<ClassifierChain>,
    cache: Option<SignalCache>,
    status: RunStatus,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            config,
            provider,
            chain: Arc::new(ClassifierChain::standard()),
            cache: None,
            status: RunStatus::new(),
        }
    }

    pub fn with_chain(mut self, chain: Arc<ClassifierChain>) -> Self {
        self.chain = chain;
        self
    }

    /// Attach a caller-owned forecast cache. The engine only reads and fills
    /// it; invalidation stays with the caller.
    pub fn with_cache(mut self, cache: SignalCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn status_handle(&self) -> RunStatus {
        self.status.clone()
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the full batch. Per-ticker failures become diagnostics; only an
    /// empty ticker list is an immediate error.
    pub fn run_backtest(&self, tickers: &[String]) -> Result<BacktestReport, EngineError> {
        if tickers.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one ticker is required".to_string(),
            ));
        }

        let mut diagnostics = Diagnostics::default();

        self.status.set_phase("Loading market data");
        let mut series_by_ticker: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut runnable: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for ticker in tickers {
            if !seen.insert(ticker.clone()) {
                continue;
            }
            match self.provider.bars(ticker, self.config.period_days) {
                Ok(bars) if bars.len() < self.config.min_history_bars => {
                    let error = EngineError::InsufficientHistory {
                        ticker: ticker.clone(),
                        have: bars.len(),
                        need: self.config.min_history_bars,
                    };
                    warn!("Skipping {}: {}", ticker, error);
                    diagnostics.skipped_tickers.push(TickerSkip {
                        ticker: ticker.clone(),
                        reason: error.to_string(),
                    });
                }
                Ok(bars) => {
                    series_by_ticker.insert(ticker.clone(), bars);
                    runnable.push(ticker.clone());
                }
                Err(error) => {
                    warn!("Skipping {}: {}", ticker, error);
                    diagnostics.skipped_tickers.push(TickerSkip {
                        ticker: ticker.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        let forecasts = self.build_forecasts(&runnable, &series_by_ticker, &mut diagnostics);

        self.status.set_phase("Replaying test partitions");
        let total = runnable.len();
        let mut risk = RiskManager::new(self.config.risk.clone());
        let mut cash = self.config.risk.initial_capital;
        let mut open_positions: HashMap<String, Position> = HashMap::new();
        let mut portfolio_history: Vec<PortfolioSnapshot> = Vec::new();
        let mut trade_log: Vec<TradeRecord> = Vec::new();
        let mut completed = 0usize;

        for ticker in &runnable {
            let Some(forecast) = forecasts.get(ticker) else {
                continue;
            };
            let series = &series_by_ticker[ticker];
            let split = split_index(series.len(), self.config.train_ratio);
            let test_bars = &series[split..];

            diagnostics.test_slice_length += forecast.test_len;
            for (_, predicted) in &forecast.predictions {
                if let Some(action) = predicted {
                    diagnostics.predicted_signal_counts.record(*action);
                }
            }

            self.replay_ticker(
                ticker,
                test_bars,
                forecast,
                &mut risk,
                &mut cash,
                &mut open_positions,
                &series_by_ticker,
                &mut portfolio_history,
                &mut trade_log,
            );

            completed += 1;
            self.status.set_progress(
                total,
                completed,
                diagnostics.skipped_tickers.len(),
                Some(ticker.as_str()),
            );
        }

        let initial_capital = self.config.risk.initial_capital;
        let final_capital = portfolio_history
            .last()
            .map(|snapshot| snapshot.portfolio_value)
            .unwrap_or(initial_capital);

        let returns = MetricsEngine::daily_returns(&portfolio_history);
        let metrics = MetricsEngine::calculate_metrics(&returns);
        let (trade_summary, _) = MetricsEngine::analyze_trades(&trade_log);

        info!(
            "Backtest completed: {} trade(s) across {} ticker(s), final portfolio value {:.2}",
            trade_log.len(),
            completed,
            final_capital
        );
        self.status.set_phase("Completed");

        Ok(BacktestReport {
            initial_capital,
            final_capital,
            portfolio_history,
            trade_log,
            diagnostics,
            metrics,
            trade_summary,
            created_at: Utc::now(),
        })
    }

    /// Classifier training and prediction fan out across a worker pool; the
    /// outputs are fully materialized before any replay so the sequential
    /// capital path never waits on a classifier.
    fn build_forecasts(
        &self,
        tickers: &[String],
        series_by_ticker: &HashMap<String, Vec<Bar>>,
        diagnostics: &mut Diagnostics,
    ) -> HashMap<String, Arc<SignalForecast>> {
        let fingerprint = self.config.fingerprint();
        let mut forecasts: HashMap<String, Arc<SignalForecast>> = HashMap::new();
        let mut tasks: Vec<ForecastTask> = Vec::new();

        for ticker in tickers {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(ticker, &fingerprint) {
                    debug!("Forecast cache hit for {}", ticker);
                    forecasts.insert(ticker.clone(), hit);
                    continue;
                }
            }
            tasks.push(ForecastTask {
                ticker: ticker.clone(),
                bars: series_by_ticker[ticker].clone(),
            });
        }

        if tasks.is_empty() {
            return forecasts;
        }

        let total = tasks.len();
        let num_workers = std::cmp::min(total, std::cmp::max(1, num_cpus::get()));
        self.status
            .set_phase(format!("Training classifiers for {} tickers", total));
        info!(
            "Using {} worker thread(s) for classifier training",
            num_workers
        );

        let (task_tx, task_rx): (Sender<ForecastTask>, Receiver<ForecastTask>) = bounded(total);
        let (result_tx, result_rx): (Sender<ForecastResultMsg>, Receiver<ForecastResultMsg>) =
            bounded(total);

        let mut handles = Vec::new();
        for _ in 0..num_workers {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let chain = self.chain.clone();
            let train_ratio = self.config.train_ratio;

            handles.push(thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let run = build_forecast(&chain, train_ratio, &task.ticker, &task.bars);
                    let message = ForecastResultMsg {
                        ticker: task.ticker,
                        run,
                    };
                    if tx.send(message).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut dispatched = 0usize;
        for task in tasks {
            if task_tx.send(task).is_err() {
                warn!("Forecast task channel closed early");
                break;
            }
            dispatched += 1;
        }
        drop(task_tx);

        let mut received = 0usize;
        while received < dispatched {
            match result_rx.recv() {
                Ok(message) => {
                    received += 1;
                    match message.run {
                        Ok(forecast) => {
                            let shared = match &self.cache {
                                Some(cache) => cache.store(&fingerprint, forecast),
                                None => Arc::new(forecast),
                            };
                            forecasts.insert(message.ticker, shared);
                        }
                        Err(error) => {
                            warn!("Skipping {}: {}", message.ticker, error);
                            diagnostics.skipped_tickers.push(TickerSkip {
                                ticker: message.ticker,
                                reason: error.to_string(),
                            });
                        }
                    }
                }
                Err(_) => break,
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        forecasts
    }

    #[allow(clippy::too_many_arguments)]
    fn replay_ticker(
        &self,
        ticker: &str,
        test_bars: &[Bar],
        forecast: &SignalForecast,
        risk: &mut RiskManager,
        cash: &mut f64,
        open_positions: &mut HashMap<String, Position>,
        series_by_ticker: &HashMap<String, Vec<Bar>>,
        portfolio_history: &mut Vec<PortfolioSnapshot>,
        trade_log: &mut Vec<TradeRecord>,
    ) {
        for (i, bar) in test_bars.iter().enumerate() {
            risk.reset_daily_tracking();
            let close = bar.close;

            // Exits first: trailing update, then the fixed-priority ladder.
            if let Some(position) = open_positions.get_mut(ticker) {
                position.update_trailing_stop(close, self.config.exit_rules.trail_pct);
                if let Some(reason) = position.evaluate_exit(bar.date, close, &self.config.exit_rules)
                {
                    let mut position = open_positions
                        .remove(ticker)
                        .expect("position checked above");
                    position.close(bar.date, close, reason);
                    self.settle_close(&position, cash, risk, trade_log);
                }
            }

            let predicted = forecast.predictions.get(i).and_then(|(_, action)| *action);
            if predicted == Some(SignalAction::Buy)
                && !open_positions.contains_key(ticker)
                && self.entry_filters_pass(bar)
            {
                self.try_open_position(ticker, bar, risk, cash, open_positions);
            }

            let positions_value = mark_open_positions(open_positions, series_by_ticker, bar.date);
            portfolio_history.push(PortfolioSnapshot {
                date: bar.date,
                capital: *cash,
                portfolio_value: *cash + positions_value,
            });
        }
    }

    /// RSI and trend filters; a missing indicator column passes rather than
    /// blocking the entry.
    fn entry_filters_pass(&self, bar: &Bar) -> bool {
        if let Some(rsi) = bar.rsi {
            if rsi >= self.config.entry_filters.rsi_ceiling {
                return false;
            }
        }
        if self.config.entry_filters.require_uptrend {
            if let Some(ema_10) = bar.ema_10 {
                if bar.close <= ema_10 {
                    return false;
                }
            }
        }
        true
    }

    fn try_open_position(
        &self,
        ticker: &str,
        bar: &Bar,
        risk: &mut RiskManager,
        cash: &mut f64,
        open_positions: &mut HashMap<String, Position>,
    ) {
        let close = bar.close;
        match risk.calculate_position_size(close) {
            SizingOutcome::Sized(size) => {
                let mut quantity = size.quantity;
                let unit_cost = close * (1.0 + self.config.cost_rate);
                if quantity as f64 * unit_cost > *cash {
                    quantity = (*cash / unit_cost).floor() as i64;
                }
                if quantity < 1 {
                    debug!(
                        "{} {}: entry skipped, cash {:.2} cannot cover one share at {:.2}",
                        ticker, bar.date, *cash, unit_cost
                    );
                    return;
                }

                let position = Position::open(
                    ticker,
                    bar.date,
                    close,
                    quantity,
                    self.config.stop_loss_pct,
                    &self.config.exit_rules,
                );
                *cash -= quantity as f64 * unit_cost;
                open_positions.insert(ticker.to_string(), position);
            }
            outcome => {
                if let Some(reason) = outcome.rejection_reason() {
                    debug!("{} {}: entry rejected: {}", ticker, bar.date, reason);
                }
            }
        }
    }

    fn settle_close(
        &self,
        position: &Position,
        cash: &mut f64,
        risk: &mut RiskManager,
        trade_log: &mut Vec<TradeRecord>,
    ) {
        let exit_price = position.exit_price.expect("position is closed");
        let exit_date = position.exit_date.expect("position is closed");
        let exit_reason = position.exit_reason.expect("position is closed");

        let entry_value = position.entry_value();
        let exit_value = position.market_value(exit_price);
        let fees = self.config.cost_rate * (entry_value + exit_value);
        let net_pnl = position.pnl - fees;

        *cash += exit_value * (1.0 - self.config.cost_rate);
        risk.update_position(TradeResult {
            ticker: position.ticker.clone(),
            pnl: net_pnl,
            entry_value,
            exit_value,
        });

        let return_pct = if entry_value > 0.0 {
            net_pnl / entry_value * 100.0
        } else {
            0.0
        };
        trade_log.push(TradeRecord {
            ticker: position.ticker.clone(),
            entry_date: position.entry_date,
            signal: SignalAction::Buy,
            entry_price: round2(position.entry_price),
            exit_price: round2(exit_price),
            return_pct: round2(return_pct),
            exit_date,
            exit_reason,
        });
    }
}

pub(crate) fn split_index(len: usize, train_ratio: f64) -> usize {
    (len as f64 * train_ratio) as usize
}

fn build_forecast(
    chain: &ClassifierChain,
    train_ratio: f64,
    ticker: &str,
    bars: &[Bar],
) -> Result<SignalForecast, EngineError> {
    let split = split_index(bars.len(), train_ratio);
    if split == 0 || split >= bars.len() {
        return Err(EngineError::InsufficientHistory {
            ticker: ticker.to_string(),
            have: bars.len(),
            need: 2,
        });
    }

    // The classifier only ever sees the leading partition; the trailing one
    // is predicted, never trained on.
    let trained = chain.train(ticker, &bars[..split])?;
    Ok(trained.forecast(ticker, &bars[split..]))
}

/// Marks every open position at its own instrument's most recent close on or
/// before the snapshot date, falling back to the entry price.
fn mark_open_positions(
    open_positions: &HashMap<String, Position>,
    series_by_ticker: &HashMap<String, Vec<Bar>>,
    date: DateTime<Utc>,
) -> f64 {
    open_positions
        .values()
        .map(|position| {
            let price = series_by_ticker
                .get(&position.ticker)
                .and_then(|series| series.iter().rev().find(|bar| bar.date <= date))
                .map(|bar| bar.close)
                .unwrap_or(position.entry_price);
            position.market_value(price)
        })
        .sum()
}
