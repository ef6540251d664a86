use crate::config::{RiskConfig, SizingRule};
use crate::models::{PortfolioStatus, TradeResult};

/// Everything a granted entry needs: share count, the stop that sized it, and
/// the loss the position can realize before the stop.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSize {
    pub quantity: i64,
    pub entry_price: f64,
    pub position_value: f64,
    pub stop_loss_price: f64,
    pub max_loss: f64,
    pub capital_at_risk_pct: f64,
}

#[derive(Debug, PartialEq)]
pub enum SizingOutcome {
    Sized(PositionSize),
    DrawdownExceeded { drawdown_pct: f64 },
    DailyLossExceeded { daily_pnl: f64 },
    TooSmall,
}

impl SizingOutcome {
    pub fn rejection_reason(&self) -> Option<String> {
        match self {
            SizingOutcome::Sized(_) => None,
            SizingOutcome::DrawdownExceeded { drawdown_pct } => {
                Some(format!("Max drawdown exceeded: {:.2}%", drawdown_pct))
            }
            SizingOutcome::DailyLossExceeded { daily_pnl } => {
                Some(format!("Daily loss limit exceeded: {:.2}", daily_pnl))
            }
            SizingOutcome::TooSmall => Some("Position too small".to_string()),
        }
    }
}

/// Tracks capital, peak capital and daily/total P&L; gates and sizes new
/// trades. One instance is scoped to one run, and every capital mutation goes
/// through `update_position`.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    initial_capital: f64,
    current_capital: f64,
    peak_capital: f64,
    daily_pnl: f64,
    total_pnl: f64,
    trades: Vec<TradeResult>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let initial_capital = config.initial_capital;
        Self {
            config,
            initial_capital,
            current_capital: initial_capital,
            peak_capital: initial_capital,
            daily_pnl: 0.0,
            total_pnl: 0.0,
            trades: Vec::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn current_capital(&self) -> f64 {
        self.current_capital
    }

    pub fn peak_capital(&self) -> f64 {
        self.peak_capital
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn total_trades(&self) -> usize {
        self.trades.len()
    }

    pub fn current_drawdown(&self) -> f64 {
        if self.peak_capital <= 0.0 {
            return 0.0;
        }
        (self.peak_capital - self.current_capital) / self.peak_capital
    }

    fn daily_loss_exceeded(&self) -> bool {
        self.daily_pnl < -self.config.max_daily_loss_pct * self.initial_capital
    }

    /// Size an entry, or explain why none is allowed. Both risk gates are
    /// applied before any sizing arithmetic runs.
    pub fn calculate_position_size(&self, entry_price: f64) -> SizingOutcome {
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return SizingOutcome::TooSmall;
        }

        let drawdown = self.current_drawdown();
        if drawdown >= self.config.max_drawdown_pct {
            return SizingOutcome::DrawdownExceeded {
                drawdown_pct: drawdown * 100.0,
            };
        }
        if self.daily_loss_exceeded() {
            return SizingOutcome::DailyLossExceeded {
                daily_pnl: self.daily_pnl,
            };
        }

        let max_quantity_by_capital =
            (self.current_capital * self.config.max_position_size_pct / entry_price).floor() as i64;

        let quantity = match self.config.sizing_rule {
            SizingRule::RiskPerTrade => {
                let capital_at_risk = self.current_capital * self.config.risk_per_trade_pct;
                let stop_distance = entry_price * self.config.stop_loss_pct;
                if stop_distance <= 0.0 {
                    return SizingOutcome::TooSmall;
                }
                ((capital_at_risk / stop_distance).floor() as i64).min(max_quantity_by_capital)
            }
            SizingRule::FixedFraction => max_quantity_by_capital,
        };

        if quantity < 1 {
            return SizingOutcome::TooSmall;
        }

        let position_value = quantity as f64 * entry_price;
        let stop_loss_price = entry_price * (1.0 - self.config.stop_loss_pct);
        let max_loss = (position_value - quantity as f64 * stop_loss_price).abs();

        SizingOutcome::Sized(PositionSize {
            quantity,
            entry_price,
            position_value,
            stop_loss_price,
            max_loss,
            capital_at_risk_pct: if self.current_capital > 0.0 {
                max_loss / self.current_capital * 100.0
            } else {
                0.0
            },
        })
    }

    /// Re-applies the two gates for callers that only need a yes/no answer.
    /// `None` means trading is allowed; `Some` carries the blocking reason.
    pub fn check_trade_allowed(&self) -> Option<String> {
        let drawdown = self.current_drawdown();
        if drawdown >= self.config.max_drawdown_pct {
            return Some(format!("Max drawdown exceeded: {:.2}%", drawdown * 100.0));
        }
        if self.daily_loss_exceeded() {
            return Some(format!("Daily loss limit exceeded: {:.2}", self.daily_pnl));
        }
        None
    }

    /// The single serialization point for realized results: applies the P&L,
    /// ratchets the capital peak and appends to the trade log.
    pub fn update_position(&mut self, result: TradeResult) {
        self.total_pnl += result.pnl;
        self.daily_pnl += result.pnl;
        self.current_capital += result.pnl;

        if self.current_capital > self.peak_capital {
            self.peak_capital = self.current_capital;
        }

        self.trades.push(result);
    }

    /// Call at the start of each simulated/live day.
    pub fn reset_daily_tracking(&mut self) {
        self.daily_pnl = 0.0;
    }

    pub fn recent_trades(&self, n: usize) -> &[TradeResult] {
        let start = self.trades.len().saturating_sub(n);
        &self.trades[start..]
    }

    pub fn get_portfolio_status(&self) -> PortfolioStatus {
        let current_drawdown = self.current_drawdown();
        let total_return_pct = if self.initial_capital > 0.0 {
            (self.current_capital - self.initial_capital) / self.initial_capital * 100.0
        } else {
            0.0
        };

        PortfolioStatus {
            initial_capital: self.initial_capital,
            current_capital: self.current_capital,
            peak_capital: self.peak_capital,
            total_pnl: self.total_pnl,
            total_return_pct,
            current_drawdown_pct: current_drawdown * 100.0,
            daily_pnl: self.daily_pnl,
            total_trades: self.trades.len(),
            max_drawdown_exceeded: current_drawdown >= self.config.max_drawdown_pct,
            daily_loss_exceeded: self.daily_loss_exceeded(),
        }
    }
}

/// Fractional Kelly position fraction from past trade statistics, capped at
/// 5% of capital. Falls back to 2% when the inputs cannot support the formula.
pub fn kelly_criterion_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 || avg_win == 0.0 {
        return 0.02;
    }

    let b = (avg_win / avg_loss).abs();
    let p = win_rate;
    let q = 1.0 - p;

    let kelly_fraction = (b * p - q) / b;
    let half_kelly = kelly_fraction * 0.5;

    half_kelly.clamp(0.0, 0.05)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realized(pnl: f64) -> TradeResult {
        TradeResult {
            ticker: "TEST".to_string(),
            pnl,
            entry_value: 10_000.0,
            exit_value: 10_000.0 + pnl,
        }
    }

    #[test]
    fn risk_per_trade_sizing_uses_stop_distance_and_capital_clamp() {
        let manager = RiskManager::new(RiskConfig::default());

        // 2% of 100k at risk over a 5% stop on a 100 price is 400 shares,
        // clamped to the 20% capital cap of 200 shares.
        match manager.calculate_position_size(100.0) {
            SizingOutcome::Sized(size) => {
                assert_eq!(size.quantity, 200);
                assert!((size.position_value - 20_000.0).abs() < 1e-9);
                assert!((size.stop_loss_price - 95.0).abs() < 1e-9);
                assert!((size.max_loss - 1_000.0).abs() < 1e-9);
                assert!((size.capital_at_risk_pct - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn sizing_rejects_when_no_whole_share_fits() {
        let manager = RiskManager::new(RiskConfig::default());
        assert_eq!(
            manager.calculate_position_size(30_000.0),
            SizingOutcome::TooSmall
        );
        assert_eq!(manager.calculate_position_size(0.0), SizingOutcome::TooSmall);
        assert_eq!(
            manager.calculate_position_size(f64::NAN),
            SizingOutcome::TooSmall
        );
    }

    #[test]
    fn drawdown_gate_blocks_sizing() {
        let mut manager = RiskManager::new(RiskConfig::default());
        manager.update_position(realized(-16_000.0));

        assert_eq!(manager.peak_capital(), 100_000.0);
        assert_eq!(manager.current_capital(), 84_000.0);
        match manager.calculate_position_size(100.0) {
            SizingOutcome::DrawdownExceeded { drawdown_pct } => {
                assert!((drawdown_pct - 16.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(manager.check_trade_allowed().is_some());
    }

    #[test]
    fn daily_loss_gate_resets_with_daily_tracking() {
        let mut manager = RiskManager::new(RiskConfig::default());
        manager.update_position(realized(-6_000.0));

        assert!(matches!(
            manager.calculate_position_size(100.0),
            SizingOutcome::DailyLossExceeded { .. }
        ));

        manager.reset_daily_tracking();
        assert!(manager.check_trade_allowed().is_none());
        assert!(matches!(
            manager.calculate_position_size(100.0),
            SizingOutcome::Sized(_)
        ));
    }

    #[test]
    fn peak_capital_never_decreases() {
        let mut manager = RiskManager::new(RiskConfig::default());
        manager.update_position(realized(5_000.0));
        assert_eq!(manager.peak_capital(), 105_000.0);
        manager.update_position(realized(-3_000.0));
        assert_eq!(manager.peak_capital(), 105_000.0);
        assert_eq!(manager.current_capital(), 102_000.0);
    }

    #[test]
    fn portfolio_status_reports_limits() {
        let mut manager = RiskManager::new(RiskConfig::default());
        manager.update_position(realized(-6_000.0));

        let status = manager.get_portfolio_status();
        assert_eq!(status.total_trades, 1);
        assert!((status.total_return_pct + 6.0).abs() < 1e-9);
        assert!(status.daily_loss_exceeded);
        assert!(!status.max_drawdown_exceeded);
    }

    #[test]
    fn kelly_fraction_is_clamped_and_defaults() {
        assert_eq!(kelly_criterion_fraction(0.6, 0.0, 100.0), 0.02);
        // Strong edge saturates at the 5% cap.
        assert_eq!(kelly_criterion_fraction(0.9, 300.0, 100.0), 0.05);
        // A losing edge never sizes below zero.
        assert_eq!(kelly_criterion_fraction(0.2, 100.0, 100.0), 0.0);
    }
}
