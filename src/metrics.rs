use crate::models::{round2, PerformanceMetrics, PortfolioSnapshot, SignalAction, TradeRecord, TradeSummary};
use statrs::statistics::Statistics;

const PERIODS_PER_YEAR: f64 = 252.0;

pub struct MetricsEngine;

impl MetricsEngine {
    /// Scalar performance statistics for a period return series. An empty
    /// series yields zeros, never an error, and a zero-variance series has a
    /// Sharpe of exactly 0.
    pub fn calculate_metrics(returns: &[f64]) -> PerformanceMetrics {
        if returns.is_empty() {
            return PerformanceMetrics::zero();
        }

        let compounded: f64 = returns.iter().map(|r| 1.0 + r).product();
        let total_return_pct = (compounded - 1.0) * 100.0;

        let periods = returns.len() as f64;
        let cagr_pct = if compounded > 0.0 {
            (compounded.powf(PERIODS_PER_YEAR / periods) - 1.0) * 100.0
        } else {
            -100.0
        };

        let series = returns.to_vec();
        let mean_return = series.clone().mean();
        let std_dev = series.std_dev();
        let sharpe_ratio = if std_dev.is_finite() && std_dev > 0.0 {
            PERIODS_PER_YEAR.sqrt() * mean_return / std_dev
        } else {
            0.0
        };

        let mut cumulative = 1.0;
        let mut running_max = f64::MIN;
        let mut max_drawdown = 0.0f64;
        for r in returns {
            cumulative *= 1.0 + r;
            if cumulative > running_max {
                running_max = cumulative;
            }
            let drawdown = if running_max > 0.0 {
                cumulative / running_max - 1.0
            } else {
                0.0
            };
            if drawdown < max_drawdown {
                max_drawdown = drawdown;
            }
        }

        PerformanceMetrics {
            total_return_pct: round2(total_return_pct),
            cagr_pct: round2(cagr_pct),
            sharpe_ratio: round2(sharpe_ratio),
            max_drawdown_pct: round2(max_drawdown * 100.0),
        }
    }

    /// Aggregates a trade list; records with non-finite returns are dropped
    /// from both the summary denominator and the returned detail list.
    pub fn analyze_trades(trades: &[TradeRecord]) -> (TradeSummary, Vec<TradeRecord>) {
        let details: Vec<TradeRecord> = trades
            .iter()
            .filter(|trade| trade.return_pct.is_finite())
            .cloned()
            .collect();

        if details.is_empty() {
            return (TradeSummary::empty(), details);
        }

        let total_trades = details.len();
        let buy_trades = details
            .iter()
            .filter(|t| t.signal == SignalAction::Buy)
            .count();
        let sell_trades = details
            .iter()
            .filter(|t| t.signal == SignalAction::Sell)
            .count();

        let gains: Vec<f64> = details
            .iter()
            .map(|t| t.return_pct)
            .filter(|r| *r > 0.0)
            .collect();
        let losses: Vec<f64> = details
            .iter()
            .map(|t| t.return_pct)
            .filter(|r| *r < 0.0)
            .collect();

        let win_rate_pct = gains.len() as f64 / total_trades as f64 * 100.0;
        let avg_gain_pct = if gains.is_empty() {
            0.0
        } else {
            gains.clone().mean()
        };
        let avg_loss_pct = if losses.is_empty() {
            0.0
        } else {
            losses.clone().mean()
        };
        let best_trade_pct = details
            .iter()
            .map(|t| t.return_pct)
            .fold(f64::NEG_INFINITY, f64::max);
        let worst_trade_pct = details
            .iter()
            .map(|t| t.return_pct)
            .fold(f64::INFINITY, f64::min);

        let summary = TradeSummary {
            total_trades,
            buy_trades,
            sell_trades,
            win_rate_pct: round2(win_rate_pct),
            avg_gain_pct: round2(avg_gain_pct),
            avg_loss_pct: round2(avg_loss_pct),
            best_trade_pct: round2(best_trade_pct),
            worst_trade_pct: round2(worst_trade_pct),
        };

        (summary, details)
    }

    /// Daily return series off the portfolio-value curve, the single source
    /// the final metrics are computed from.
    pub fn daily_returns(snapshots: &[PortfolioSnapshot]) -> Vec<f64> {
        snapshots
            .windows(2)
            .map(|window| {
                let prev_value = window[0].portfolio_value;
                let curr_value = window[1].portfolio_value;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use chrono::{Duration, TimeZone, Utc};

    fn trade(signal: SignalAction, return_pct: f64) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        TradeRecord {
            ticker: "TEST".to_string(),
            entry_date: entry,
            signal,
            entry_price: 100.0,
            exit_price: 100.0 * (1.0 + return_pct / 100.0),
            return_pct,
            exit_date: entry + Duration::days(10),
            exit_reason: ExitReason::TimeBased,
        }
    }

    #[test]
    fn empty_series_yields_zero_metrics() {
        let metrics = MetricsEngine::calculate_metrics(&[]);
        assert_eq!(metrics.total_return_pct, 0.0);
        assert_eq!(metrics.cagr_pct, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
    }

    #[test]
    fn constant_series_has_zero_sharpe() {
        let metrics = MetricsEngine::calculate_metrics(&[0.01; 30]);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert!(metrics.total_return_pct > 0.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
    }

    #[test]
    fn total_return_compounds() {
        let metrics = MetricsEngine::calculate_metrics(&[0.10, -0.10]);
        assert!((metrics.total_return_pct - (-1.0)).abs() < 1e-9);
        assert!(metrics.max_drawdown_pct <= -10.0 + 1e-9);
    }

    #[test]
    fn drawdown_is_measured_from_running_peak() {
        // Up 20%, down 25%, partial recovery: trough is 25% below the peak.
        let metrics = MetricsEngine::calculate_metrics(&[0.20, -0.25, 0.05]);
        assert!((metrics.max_drawdown_pct - (-25.0)).abs() < 1e-9);
    }

    #[test]
    fn analyze_trades_handles_empty_input() {
        let (summary, details) = MetricsEngine::analyze_trades(&[]);
        assert_eq!(summary.total_trades, 0);
        assert!(details.is_empty());
    }

    #[test]
    fn analyze_trades_excludes_non_finite_returns() {
        let trades = vec![
            trade(SignalAction::Buy, 5.0),
            trade(SignalAction::Buy, f64::NAN),
            trade(SignalAction::Sell, -2.0),
        ];
        let (summary, details) = MetricsEngine::analyze_trades(&trades);
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.buy_trades, 1);
        assert_eq!(summary.sell_trades, 1);
        assert_eq!(summary.win_rate_pct, 50.0);
        assert_eq!(summary.avg_gain_pct, 5.0);
        assert_eq!(summary.avg_loss_pct, -2.0);
        assert_eq!(summary.best_trade_pct, 5.0);
        assert_eq!(summary.worst_trade_pct, -2.0);
        assert_eq!(details.len(), 2);
    }

    #[test]
    fn analyze_trades_round_trips_its_own_details() {
        let trades = vec![
            trade(SignalAction::Buy, 8.25),
            trade(SignalAction::Buy, -3.5),
            trade(SignalAction::Sell, 1.75),
            trade(SignalAction::Buy, 0.0),
        ];
        let (summary, details) = MetricsEngine::analyze_trades(&trades);
        let (summary_again, details_again) = MetricsEngine::analyze_trades(&details);

        assert_eq!(summary.total_trades, summary_again.total_trades);
        assert_eq!(summary.win_rate_pct, summary_again.win_rate_pct);
        assert_eq!(summary.avg_gain_pct, summary_again.avg_gain_pct);
        assert_eq!(summary.avg_loss_pct, summary_again.avg_loss_pct);
        assert_eq!(summary.best_trade_pct, summary_again.best_trade_pct);
        assert_eq!(summary.worst_trade_pct, summary_again.worst_trade_pct);
        assert_eq!(details.len(), details_again.len());
    }

    #[test]
    fn daily_returns_come_from_portfolio_values() {
        let base = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        let snapshots: Vec<PortfolioSnapshot> = [100_000.0, 101_000.0, 99_990.0]
            .iter()
            .enumerate()
            .map(|(i, value)| PortfolioSnapshot {
                date: base + Duration::days(i as i64),
                capital: *value,
                portfolio_value: *value,
            })
            .collect();

        let returns = MetricsEngine::daily_returns(&snapshots);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.01).abs() < 1e-12);
        assert!((returns[1] + 0.01).abs() < 1e-12);
    }
}
