use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One trading day for one instrument: OHLCV plus the indicator columns and
/// the precomputed signal label the data pipeline attaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_shares: i64,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub ema_10: Option<f64>,
    #[serde(default)]
    pub ema_20: Option<f64>,
    #[serde(default)]
    pub macd: Option<f64>,
    #[serde(default)]
    pub signal: Option<SignalAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Hold,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Hold => "HOLD",
            SignalAction::Sell => "SELL",
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(SignalAction::Buy),
            "HOLD" => Ok(SignalAction::Hold),
            "SELL" => Ok(SignalAction::Sell),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

/// Why a position was closed. The variants are mutually exclusive; the engine
/// stops evaluating further conditions once one fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    EarlyProfit,
    TimeBased,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::EarlyProfit => "EARLY_PROFIT",
            ExitReason::TimeBased => "TIME_BASED",
        }
    }
}

/// Immutable snapshot taken when a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(rename = "Stock")]
    pub ticker: String,
    #[serde(rename = "Date")]
    pub entry_date: DateTime<Utc>,
    #[serde(rename = "Signal")]
    pub signal: SignalAction,
    #[serde(rename = "Entry")]
    pub entry_price: f64,
    #[serde(rename = "Exit")]
    pub exit_price: f64,
    #[serde(rename = "Return%")]
    pub return_pct: f64,
    #[serde(rename = "ExitDate")]
    pub exit_date: DateTime<Utc>,
    #[serde(rename = "ExitReason")]
    pub exit_reason: ExitReason,
}

/// Daily capital snapshot with open positions marked to market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(rename = "Date")]
    pub date: DateTime<Utc>,
    #[serde(rename = "Capital")]
    pub capital: f64,
    #[serde(rename = "Portfolio_Value")]
    pub portfolio_value: f64,
}

/// Realized outcome of one closed trade, routed through
/// `RiskManager::update_position`.
#[derive(Debug, Clone)]
pub struct TradeResult {
    pub ticker: String,
    pub pnl: f64,
    pub entry_value: f64,
    pub exit_value: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalCounts {
    #[serde(rename = "BUY")]
    pub buy: usize,
    #[serde(rename = "HOLD")]
    pub hold: usize,
    #[serde(rename = "SELL")]
    pub sell: usize,
}

impl SignalCounts {
    pub fn record(&mut self, action: SignalAction) {
        match action {
            SignalAction::Buy => self.buy += 1,
            SignalAction::Hold => self.hold += 1,
            SignalAction::Sell => self.sell += 1,
        }
    }
}

/// A ticker the batch skipped instead of failing, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSkip {
    pub ticker: String,
    pub reason: String,
}

/// Aggregate counts describing classifier output distribution and test-slice
/// size for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub test_slice_length: usize,
    pub predicted_signal_counts: SignalCounts,
    #[serde(default)]
    pub skipped_tickers: Vec<TickerSkip>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
}

impl PerformanceMetrics {
    pub fn zero() -> Self {
        Self {
            total_return_pct: 0.0,
            cagr_pct: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSummary {
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub win_rate_pct: f64,
    pub avg_gain_pct: f64,
    pub avg_loss_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
}

impl TradeSummary {
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            buy_trades: 0,
            sell_trades: 0,
            win_rate_pct: 0.0,
            avg_gain_pct: 0.0,
            avg_loss_pct: 0.0,
            best_trade_pct: 0.0,
            worst_trade_pct: 0.0,
        }
    }
}

/// Everything a batch backtest run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub portfolio_history: Vec<PortfolioSnapshot>,
    pub trade_log: Vec<TradeRecord>,
    pub diagnostics: Diagnostics,
    pub metrics: PerformanceMetrics,
    pub trade_summary: TradeSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStatus {
    pub initial_capital: f64,
    pub current_capital: f64,
    pub peak_capital: f64,
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub current_drawdown_pct: f64,
    pub daily_pnl: f64,
    pub total_trades: usize,
    pub max_drawdown_exceeded: bool,
    pub daily_loss_exceeded: bool,
}

/// Round to two decimals the way recorded trade fields are rounded.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
