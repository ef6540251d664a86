use crate::config::{ExitRules, RiskConfig};
use crate::models::{PortfolioStatus, SignalAction, TradeResult};
use crate::position::Position;
use crate::quotes::QuoteSource;
use crate::risk::{RiskManager, SizingOutcome};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Executed,
    Rejected,
    NoAction,
    Error,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Executed => "executed",
            CycleStatus::Rejected => "rejected",
            CycleStatus::NoAction => "no_action",
            CycleStatus::Error => "error",
        }
    }
}

/// Typed outcome of one live decision for one ticker.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub ticker: String,
    pub status: CycleStatus,
    pub action: Option<&'static str>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub pnl: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub reason: Option<String>,
}

impl CycleOutcome {
    fn rejected(ticker: &str, reason: String) -> Self {
        Self {
            ticker: ticker.to_string(),
            status: CycleStatus::Rejected,
            action: None,
            price: None,
            quantity: None,
            pnl: None,
            pnl_pct: None,
            reason: Some(reason),
        }
    }

    fn no_action(ticker: &str, reason: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            status: CycleStatus::NoAction,
            action: None,
            price: None,
            quantity: None,
            pnl: None,
            pnl_pct: None,
            reason: Some(reason.to_string()),
        }
    }

    fn error(ticker: &str, reason: String) -> Self {
        Self {
            ticker: ticker.to_string(),
            status: CycleStatus::Error,
            action: None,
            price: None,
            quantity: None,
            pnl: None,
            pnl_pct: None,
            reason: Some(reason),
        }
    }
}

/// Unrealized mark for one open live position.
#[derive(Debug, Clone)]
pub struct PositionMark {
    pub ticker: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub quantity: i64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
}

/// Live-mode variant of the simulation: the same Position and RiskManager
/// primitives, driven by on-demand quotes instead of a replayed bar slice.
pub struct PaperTradingSystem<Q: QuoteSource> {
    quotes: Q,
    risk: RiskManager,
    exit_rules: ExitRules,
    open_positions: HashMap<String, Position>,
    history: Vec<CycleOutcome>,
}

impl<Q: QuoteSource> PaperTradingSystem<Q> {
    pub fn new(risk_config: RiskConfig, exit_rules: ExitRules, quotes: Q) -> Self {
        Self {
            quotes,
            risk: RiskManager::new(risk_config),
            exit_rules,
            open_positions: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// One decision for one ticker: gate, fetch, act. A fetch failure is an
    /// `Error` outcome and the ticker is simply retried next cycle.
    pub async fn run_live_cycle(&mut self, ticker: &str, signal: SignalAction) -> CycleOutcome {
        if let Some(reason) = self.risk.check_trade_allowed() {
            return CycleOutcome::rejected(ticker, reason);
        }

        let price = match self.quotes.latest_price(ticker).await {
            Ok(price) => price,
            Err(error) => return CycleOutcome::error(ticker, error.to_string()),
        };

        let outcome = match signal {
            SignalAction::Hold => CycleOutcome::no_action(ticker, "HOLD signal"),
            SignalAction::Buy => self.open_long(ticker, price),
            SignalAction::Sell => self.close_long(ticker, price),
        };

        if outcome.status == CycleStatus::Executed {
            self.history.push(outcome.clone());
        }
        outcome
    }

    fn open_long(&mut self, ticker: &str, price: f64) -> CycleOutcome {
        if self.open_positions.contains_key(ticker) {
            return CycleOutcome::rejected(ticker, "Position already exists".to_string());
        }

        match self.risk.calculate_position_size(price) {
            SizingOutcome::Sized(size) => {
                let position = Position::open(
                    ticker,
                    Utc::now(),
                    price,
                    size.quantity,
                    self.risk.config().stop_loss_pct,
                    &self.exit_rules,
                );
                info!(
                    "Opened {} x{} at {:.2} (stop {:.2})",
                    ticker, size.quantity, price, position.stop_loss
                );
                self.open_positions.insert(ticker.to_string(), position);

                CycleOutcome {
                    ticker: ticker.to_string(),
                    status: CycleStatus::Executed,
                    action: Some("OPEN_BUY"),
                    price: Some(price),
                    quantity: Some(size.quantity),
                    pnl: None,
                    pnl_pct: None,
                    reason: None,
                }
            }
            outcome => CycleOutcome::rejected(
                ticker,
                outcome
                    .rejection_reason()
                    .unwrap_or_else(|| "Position size calculation failed".to_string()),
            ),
        }
    }

    fn close_long(&mut self, ticker: &str, price: f64) -> CycleOutcome {
        let Some(position) = self.open_positions.remove(ticker) else {
            return CycleOutcome::rejected(ticker, "No position to close".to_string());
        };

        let entry_value = position.entry_value();
        let exit_value = position.market_value(price);
        let pnl = exit_value - entry_value;
        let pnl_pct = if entry_value > 0.0 {
            pnl / entry_value * 100.0
        } else {
            0.0
        };

        self.risk.update_position(TradeResult {
            ticker: ticker.to_string(),
            pnl,
            entry_value,
            exit_value,
        });
        info!("Closed {} at {:.2} (P&L {:.2})", ticker, price, pnl);

        CycleOutcome {
            ticker: ticker.to_string(),
            status: CycleStatus::Executed,
            action: Some("CLOSE_LONG"),
            price: Some(price),
            quantity: Some(position.quantity),
            pnl: Some(pnl),
            pnl_pct: Some(pnl_pct),
            reason: None,
        }
    }

    /// Fetch quotes for all watched tickers concurrently; failures are
    /// reported and the ticker is left out until the next cycle.
    async fn fetch_prices(&self, tickers: Vec<String>) -> Vec<(String, f64)> {
        let quotes = &self.quotes;
        let mut fetches: FuturesUnordered<_> = tickers
            .into_iter()
            .map(|ticker| async move {
                let result = quotes.latest_price(&ticker).await;
                (ticker, result)
            })
            .collect();

        let mut priced = Vec::new();
        while let Some((ticker, result)) = fetches.next().await {
            match result {
                Ok(price) => priced.push((ticker, price)),
                Err(error) => warn!("Skipping {} this cycle: {}", ticker, error),
            }
        }
        priced
    }

    /// Sweep every open position through the same exit ladder the backtest
    /// uses, against live prices. A failed fetch skips that ticker for this
    /// cycle; it is retried on the next one.
    pub async fn check_stop_losses(&mut self) -> Vec<CycleOutcome> {
        let tickers: Vec<String> = self.open_positions.keys().cloned().collect();
        let priced = self.fetch_prices(tickers).await;
        let mut executed = Vec::new();

        for (ticker, price) in priced {
            let now = Utc::now();
            let reason = {
                let position = self
                    .open_positions
                    .get_mut(&ticker)
                    .expect("ticker taken from key set");
                position.update_trailing_stop(price, self.exit_rules.trail_pct);
                position.evaluate_exit(now, price, &self.exit_rules)
            };

            if let Some(reason) = reason {
                let mut position = self
                    .open_positions
                    .remove(&ticker)
                    .expect("ticker taken from key set");
                position.close(now, price, reason);

                let entry_value = position.entry_value();
                let exit_value = position.market_value(price);
                self.risk.update_position(TradeResult {
                    ticker: ticker.clone(),
                    pnl: position.pnl,
                    entry_value,
                    exit_value,
                });
                info!(
                    "Exit rule {} closed {} at {:.2} (P&L {:.2})",
                    reason.as_str(),
                    ticker,
                    price,
                    position.pnl
                );

                let outcome = CycleOutcome {
                    ticker: ticker.clone(),
                    status: CycleStatus::Executed,
                    action: Some("CLOSE_LONG"),
                    price: Some(price),
                    quantity: Some(position.quantity),
                    pnl: Some(position.pnl),
                    pnl_pct: Some(position.pnl_pct),
                    reason: Some(reason.as_str().to_string()),
                };
                self.history.push(outcome.clone());
                executed.push(outcome);
            }
        }

        executed
    }

    /// Mark-to-market report over the open positions. Fetch failures drop the
    /// ticker from this report only.
    pub async fn mark_positions(&self) -> Vec<PositionMark> {
        let tickers: Vec<String> = self.open_positions.keys().cloned().collect();
        let priced = self.fetch_prices(tickers).await;

        let mut marks = Vec::new();
        for (ticker, price) in priced {
            let Some(position) = self.open_positions.get(&ticker) else {
                continue;
            };

            let entry_value = position.entry_value();
            let unrealized_pnl = position.market_value(price) - entry_value;
            marks.push(PositionMark {
                ticker: ticker.clone(),
                entry_price: position.entry_price,
                current_price: price,
                quantity: position.quantity,
                unrealized_pnl,
                unrealized_pnl_pct: if entry_value > 0.0 {
                    unrealized_pnl / entry_value * 100.0
                } else {
                    0.0
                },
            });
        }
        marks
    }

    /// Call at the start of each live trading day.
    pub fn reset_daily_stats(&mut self) {
        self.risk.reset_daily_tracking();
    }

    pub fn get_portfolio_status(&self) -> PortfolioStatus {
        self.risk.get_portfolio_status()
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn history(&self) -> &[CycleOutcome] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted price source: a fixed price per ticker, or a failure.
    struct StubQuotes {
        prices: Mutex<HashMap<String, f64>>,
    }

    impl StubQuotes {
        fn new(entries: &[(&str, f64)]) -> Self {
            Self {
                prices: Mutex::new(
                    entries
                        .iter()
                        .map(|(ticker, price)| (ticker.to_string(), *price))
                        .collect(),
                ),
            }
        }

        fn set(&self, ticker: &str, price: f64) {
            self.prices
                .lock()
                .unwrap()
                .insert(ticker.to_string(), price);
        }

        fn remove(&self, ticker: &str) {
            self.prices.lock().unwrap().remove(ticker);
        }
    }

    impl QuoteSource for StubQuotes {
        async fn latest_price(&self, ticker: &str) -> Result<f64, EngineError> {
            self.prices
                .lock()
                .unwrap()
                .get(ticker)
                .copied()
                .ok_or_else(|| EngineError::PriceFetchError {
                    ticker: ticker.to_string(),
                    source: anyhow!("no quote scripted"),
                })
        }
    }

    fn system(entries: &[(&str, f64)]) -> PaperTradingSystem<StubQuotes> {
        PaperTradingSystem::new(
            RiskConfig::default(),
            ExitRules::default(),
            StubQuotes::new(entries),
        )
    }

    #[tokio::test]
    async fn hold_signal_is_no_action() {
        let mut trader = system(&[("INFY", 1500.0)]);
        let outcome = trader.run_live_cycle("INFY", SignalAction::Hold).await;
        assert_eq!(outcome.status, CycleStatus::NoAction);
    }

    #[tokio::test]
    async fn buy_then_duplicate_buy_is_rejected() {
        let mut trader = system(&[("INFY", 1500.0)]);

        let opened = trader.run_live_cycle("INFY", SignalAction::Buy).await;
        assert_eq!(opened.status, CycleStatus::Executed);
        assert_eq!(opened.action, Some("OPEN_BUY"));
        assert!(opened.quantity.unwrap() >= 1);
        assert_eq!(trader.open_position_count(), 1);

        let duplicate = trader.run_live_cycle("INFY", SignalAction::Buy).await;
        assert_eq!(duplicate.status, CycleStatus::Rejected);
        assert_eq!(trader.open_position_count(), 1);
    }

    #[tokio::test]
    async fn sell_without_position_is_rejected() {
        let mut trader = system(&[("INFY", 1500.0)]);
        let outcome = trader.run_live_cycle("INFY", SignalAction::Sell).await;
        assert_eq!(outcome.status, CycleStatus::Rejected);
    }

    #[tokio::test]
    async fn sell_realizes_pnl_through_the_risk_manager() {
        let mut trader = system(&[("INFY", 100.0)]);
        trader.run_live_cycle("INFY", SignalAction::Buy).await;

        trader.quotes.set("INFY", 110.0);
        let closed = trader.run_live_cycle("INFY", SignalAction::Sell).await;
        assert_eq!(closed.status, CycleStatus::Executed);
        assert_eq!(closed.action, Some("CLOSE_LONG"));
        assert!((closed.pnl_pct.unwrap() - 10.0).abs() < 1e-9);

        let status = trader.get_portfolio_status();
        assert_eq!(status.total_trades, 1);
        assert!(status.total_pnl > 0.0);
        assert_eq!(trader.open_position_count(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_is_an_error_outcome() {
        let mut trader = system(&[]);
        let outcome = trader.run_live_cycle("MISSING", SignalAction::Buy).await;
        assert_eq!(outcome.status, CycleStatus::Error);
        assert!(outcome.reason.unwrap().contains("MISSING"));
    }

    #[tokio::test]
    async fn stop_sweep_closes_breached_positions_and_skips_failed_fetches() {
        let mut trader = system(&[("AAA", 100.0), ("BBB", 100.0)]);
        trader.run_live_cycle("AAA", SignalAction::Buy).await;
        trader.run_live_cycle("BBB", SignalAction::Buy).await;
        assert_eq!(trader.open_position_count(), 2);

        // AAA breaches its 5% stop; BBB's quote disappears for the cycle.
        trader.quotes.set("AAA", 90.0);
        trader.quotes.remove("BBB");

        let executed = trader.check_stop_losses().await;
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].ticker, "AAA");
        assert_eq!(executed[0].reason.as_deref(), Some("STOP_LOSS"));
        assert_eq!(trader.open_position_count(), 1);
    }

    #[tokio::test]
    async fn daily_loss_gate_blocks_the_whole_cycle() {
        let mut trader = system(&[("AAA", 100.0)]);
        trader.risk.update_position(TradeResult {
            ticker: "AAA".to_string(),
            pnl: -6_000.0,
            entry_value: 20_000.0,
            exit_value: 14_000.0,
        });

        let outcome = trader.run_live_cycle("AAA", SignalAction::Buy).await;
        assert_eq!(outcome.status, CycleStatus::Rejected);

        trader.reset_daily_stats();
        let outcome = trader.run_live_cycle("AAA", SignalAction::Buy).await;
        assert_eq!(outcome.status, CycleStatus::Executed);
    }

    #[tokio::test]
    async fn marks_report_unrealized_pnl() {
        let mut trader = system(&[("AAA", 100.0)]);
        trader.run_live_cycle("AAA", SignalAction::Buy).await;
        trader.quotes.set("AAA", 104.0);

        let marks = trader.mark_positions().await;
        assert_eq!(marks.len(), 1);
        assert!((marks[0].unrealized_pnl_pct - 4.0).abs() < 1e-9);
    }
}
