use crate::param_utils::*;
use std::collections::HashMap;

/// How a granted entry is sized. `RiskPerTrade` is the stop-distance formula;
/// `FixedFraction` is the legacy capital-fraction rule kept as a selectable
/// mode so one engine covers both behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingRule {
    RiskPerTrade,
    FixedFraction,
}

/// Risk limits and sizing parameters shared by backtest and live trading.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub initial_capital: f64,
    pub max_position_size_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub stop_loss_pct: f64,
    pub risk_per_trade_pct: f64,
    pub sizing_rule: SizingRule,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            max_position_size_pct: 0.20,
            max_daily_loss_pct: 0.05,
            max_drawdown_pct: 0.15,
            stop_loss_pct: 0.05,
            risk_per_trade_pct: 0.02,
            sizing_rule: SizingRule::RiskPerTrade,
        }
    }
}

impl RiskConfig {
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        let sizing_rule = if get_rounded_param(parameters, "sizingMode", 0) == 1 {
            SizingRule::FixedFraction
        } else {
            SizingRule::RiskPerTrade
        };
        Self {
            initial_capital: get_param(parameters, "initialCapital", 100_000.0),
            max_position_size_pct: get_param_clamped(
                parameters,
                "maxPositionSizeRatio",
                0.20,
                0.0,
                1.0,
            ),
            max_daily_loss_pct: get_param_clamped(parameters, "maxDailyLossRatio", 0.05, 0.0, 1.0),
            max_drawdown_pct: get_param_clamped(parameters, "maxDrawdownRatio", 0.15, 0.0, 1.0),
            stop_loss_pct: get_param_clamped(parameters, "stopLossRatio", 0.05, 0.0, 1.0),
            risk_per_trade_pct: get_param_clamped(parameters, "riskPerTradeRatio", 0.02, 0.0, 1.0),
            sizing_rule,
        }
    }
}

/// Exit-rule set for an open position, evaluated in fixed priority order.
#[derive(Debug, Clone)]
pub struct ExitRules {
    pub take_profit_pct: f64,
    pub trail_stop: bool,
    pub trail_pct: f64,
    pub min_hold_days: i64,
    pub early_profit_pct: f64,
    pub max_hold_days: i64,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            take_profit_pct: 0.10,
            trail_stop: true,
            trail_pct: 0.04,
            min_hold_days: 10,
            early_profit_pct: 2.0,
            max_hold_days: 20,
        }
    }
}

/// Entry quality filters applied before sizing a BUY signal. A filter whose
/// indicator column is missing passes rather than blocking the entry.
#[derive(Debug, Clone)]
pub struct EntryFilters {
    pub rsi_ceiling: f64,
    pub require_uptrend: bool,
}

impl Default for EntryFilters {
    fn default() -> Self {
        Self {
            rsi_ceiling: 70.0,
            require_uptrend: true,
        }
    }
}

/// Full configuration for one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub stop_loss_pct: f64,
    pub cost_rate: f64,
    pub train_ratio: f64,
    pub min_history_bars: usize,
    pub period_days: usize,
    pub exit_rules: ExitRules,
    pub entry_filters: EntryFilters,
    pub risk: RiskConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.07,
            cost_rate: 0.002,
            train_ratio: 0.8,
            min_history_bars: 40,
            period_days: 365 * 5,
            exit_rules: ExitRules::default(),
            entry_filters: EntryFilters::default(),
            // Sizing must assume the same stop the positions are opened with.
            risk: RiskConfig {
                stop_loss_pct: 0.07,
                ..RiskConfig::default()
            },
        }
    }
}

impl BacktestConfig {
    /// Build a config from a flat parameter map, falling back to defaults for
    /// anything absent or non-finite.
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        let defaults = Self::default();
        let mut risk = RiskConfig::from_parameters(parameters);
        // The backtest sizes positions against its own per-trade stop.
        risk.stop_loss_pct = get_param_clamped(parameters, "stopLossRatio", 0.07, 0.0, 1.0);

        Self {
            stop_loss_pct: risk.stop_loss_pct,
            cost_rate: get_param_clamped(parameters, "costRate", defaults.cost_rate, 0.0, 0.5),
            train_ratio: get_param_clamped(parameters, "trainRatio", defaults.train_ratio, 0.5, 0.95),
            min_history_bars: get_usize_param_min(
                parameters,
                "minHistoryBars",
                defaults.min_history_bars,
                2,
            ),
            period_days: get_usize_param_min(parameters, "periodDays", defaults.period_days, 1),
            exit_rules: ExitRules {
                take_profit_pct: get_param_clamped(
                    parameters,
                    "takeProfitRatio",
                    defaults.exit_rules.take_profit_pct,
                    0.0,
                    10.0,
                ),
                trail_stop: get_flag_param(parameters, "trailStop", true),
                trail_pct: get_param_clamped(
                    parameters,
                    "trailRatio",
                    defaults.exit_rules.trail_pct,
                    0.0,
                    1.0,
                ),
                min_hold_days: get_rounded_param(parameters, "minHoldDays", 10),
                early_profit_pct: get_param(parameters, "earlyProfitPct", 2.0),
                max_hold_days: get_rounded_param(parameters, "maxHoldDays", 20),
            },
            entry_filters: EntryFilters {
                rsi_ceiling: get_param_clamped(parameters, "rsiCeiling", 70.0, 0.0, 100.0),
                require_uptrend: get_flag_param(parameters, "trendFilter", true),
            },
            risk,
        }
    }

    /// Stable fingerprint of the parameters that change simulation output,
    /// used as part of cache keys.
    pub fn fingerprint(&self) -> String {
        format!(
            "sl{:.4}_c{:.4}_tr{:.2}_tp{:.4}_trail{}{:.4}_hold{}-{}_ep{:.2}_rsi{:.1}_up{}_cap{:.0}_sz{:?}",
            self.stop_loss_pct,
            self.cost_rate,
            self.train_ratio,
            self.exit_rules.take_profit_pct,
            self.exit_rules.trail_stop as u8,
            self.exit_rules.trail_pct,
            self.exit_rules.min_hold_days,
            self.exit_rules.max_hold_days,
            self.exit_rules.early_profit_pct,
            self.entry_filters.rsi_ceiling,
            self.entry_filters.require_uptrend as u8,
            self.risk.initial_capital,
            self.risk.sizing_rule,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = BacktestConfig::default();
        assert_eq!(config.risk.initial_capital, 100_000.0);
        assert_eq!(config.exit_rules.max_hold_days, 20);
        assert_eq!(config.min_history_bars, 40);
        assert_eq!(config.risk.sizing_rule, SizingRule::RiskPerTrade);
    }

    #[test]
    fn from_parameters_overrides_and_clamps() {
        let mut parameters = HashMap::new();
        parameters.insert("initialCapital".to_string(), 50_000.0);
        parameters.insert("stopLossRatio".to_string(), 0.10);
        parameters.insert("trainRatio".to_string(), 0.99);
        parameters.insert("sizingMode".to_string(), 1.0);

        let config = BacktestConfig::from_parameters(&parameters);
        assert_eq!(config.risk.initial_capital, 50_000.0);
        assert_eq!(config.stop_loss_pct, 0.10);
        assert_eq!(config.risk.stop_loss_pct, 0.10);
        assert_eq!(config.train_ratio, 0.95);
        assert_eq!(config.risk.sizing_rule, SizingRule::FixedFraction);
    }

    #[test]
    fn fingerprint_changes_with_simulation_parameters() {
        let base = BacktestConfig::default();
        let mut tweaked = BacktestConfig::default();
        tweaked.exit_rules.take_profit_pct = 0.12;
        assert_ne!(base.fingerprint(), tweaked.fingerprint());
    }
}
