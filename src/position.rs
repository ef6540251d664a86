use crate::config::ExitRules;
use crate::models::ExitReason;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// One open simulated trade. Created by the engine that owns it, mutated once
/// per day while open (trailing-stop update), finalized the moment an exit
/// condition fires and immutable after that.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub ticker: String,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: i64,
    pub initial_stop_loss: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trail_stop: bool,
    pub peak_price: f64,
    pub status: PositionStatus,
    pub exit_date: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: f64,
    pub pnl_pct: f64,
}

impl Position {
    pub fn open(
        ticker: &str,
        entry_date: DateTime<Utc>,
        entry_price: f64,
        quantity: i64,
        stop_loss_pct: f64,
        rules: &ExitRules,
    ) -> Self {
        let initial_stop_loss = entry_price * (1.0 - stop_loss_pct);
        Self {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            entry_date,
            entry_price,
            quantity,
            initial_stop_loss,
            stop_loss: initial_stop_loss,
            take_profit: entry_price * (1.0 + rules.take_profit_pct),
            trail_stop: rules.trail_stop,
            peak_price: entry_price,
            status: PositionStatus::Open,
            exit_date: None,
            exit_price: None,
            exit_reason: None,
            pnl: 0.0,
            pnl_pct: 0.0,
        }
    }

    /// Daily ratchet, run before exit checks: the peak only rises, and with
    /// trailing enabled the stop floor only rises with it.
    pub fn update_trailing_stop(&mut self, close: f64, trail_pct: f64) {
        if close > self.peak_price {
            self.peak_price = close;
        }
        if self.trail_stop {
            let trailed = self.peak_price * (1.0 - trail_pct);
            if trailed > self.stop_loss {
                self.stop_loss = trailed;
            }
        }
    }

    pub fn days_held(&self, date: DateTime<Utc>) -> i64 {
        (date - self.entry_date).num_days()
    }

    pub fn unrealized_profit_pct(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn entry_value(&self) -> f64 {
        self.entry_price * self.quantity as f64
    }

    pub fn market_value(&self, price: f64) -> f64 {
        price * self.quantity as f64
    }

    /// Exit conditions in fixed priority order; the first match wins and the
    /// rest are not evaluated. Take-profit outranks stop-loss even when one
    /// bar crosses both because intrabar sequencing is unknowable from daily
    /// closes.
    pub fn evaluate_exit(&self, date: DateTime<Utc>, close: f64, rules: &ExitRules) -> Option<ExitReason> {
        if self.status != PositionStatus::Open {
            return None;
        }
        if close >= self.take_profit {
            return Some(ExitReason::TakeProfit);
        }
        if close <= self.stop_loss {
            return Some(ExitReason::StopLoss);
        }

        let days_held = self.days_held(date);
        if days_held >= rules.min_hold_days
            && self.unrealized_profit_pct(close) > rules.early_profit_pct
        {
            return Some(ExitReason::EarlyProfit);
        }
        if days_held >= rules.max_hold_days {
            return Some(ExitReason::TimeBased);
        }

        None
    }

    /// Finalize the position. Gross P&L only; transaction costs are applied by
    /// the capital accounting that sits above the position.
    pub fn close(&mut self, exit_date: DateTime<Utc>, exit_price: f64, reason: ExitReason) {
        self.exit_date = Some(exit_date);
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.pnl = (exit_price - self.entry_price) * self.quantity as f64;
        self.pnl_pct = (exit_price - self.entry_price) / self.entry_price * 100.0;
        self.status = PositionStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn open_position(entry_price: f64, stop_loss_pct: f64) -> (Position, ExitRules) {
        let rules = ExitRules::default();
        let position = Position::open("TEST", day(0), entry_price, 10, stop_loss_pct, &rules);
        (position, rules)
    }

    #[test]
    fn take_profit_outranks_stop_loss() {
        let (mut position, rules) = open_position(100.0, 0.07);
        position.stop_loss = 93.0;
        assert!((position.take_profit - 110.0).abs() < 1e-9);
        assert_eq!(
            position.evaluate_exit(day(1), 115.0, &rules),
            Some(ExitReason::TakeProfit)
        );

        // Even when one close satisfies both thresholds, the first rule in
        // priority order wins.
        position.stop_loss = 120.0;
        assert_eq!(
            position.evaluate_exit(day(1), 115.0, &rules),
            Some(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn time_based_exit_fires_exactly_at_max_hold() {
        let (mut position, rules) = open_position(100.0, 0.07);
        for offset in 1..rules.max_hold_days {
            // Hover just above entry: no target, no stop, profit below 2%.
            let close = 100.5;
            position.update_trailing_stop(close, rules.trail_pct);
            assert_eq!(position.evaluate_exit(day(offset), close, &rules), None);
        }
        assert_eq!(
            position.evaluate_exit(day(rules.max_hold_days), 100.5, &rules),
            Some(ExitReason::TimeBased)
        );
    }

    #[test]
    fn early_profit_requires_both_age_and_profit() {
        let (position, rules) = open_position(100.0, 0.07);

        // 12 days held, +1.5%: profit threshold not met.
        assert_eq!(position.evaluate_exit(day(12), 101.5, &rules), None);
        // 12 days held, +2.5%: both conditions met.
        assert_eq!(
            position.evaluate_exit(day(12), 102.5, &rules),
            Some(ExitReason::EarlyProfit)
        );
        // 9 days held, +2.5%: minimum hold not reached.
        assert_eq!(position.evaluate_exit(day(9), 102.5, &rules), None);
    }

    #[test]
    fn trailing_stop_never_decreases() {
        let (mut position, rules) = open_position(100.0, 0.07);
        let path = [101.0, 104.0, 99.0, 107.0, 95.0, 106.0, 110.0, 90.0];
        let mut last_stop = position.stop_loss;
        for (offset, close) in path.iter().enumerate() {
            position.update_trailing_stop(*close, rules.trail_pct);
            assert!(position.stop_loss >= last_stop);
            assert!(position.peak_price >= *close);
            last_stop = position.stop_loss;
            let _ = position.evaluate_exit(day(offset as i64 + 1), *close, &rules);
        }
        // Peak 110 ratchets the floor to 105.6.
        assert!((position.stop_loss - 110.0 * 0.96).abs() < 1e-9);
    }

    #[test]
    fn close_is_terminal_and_records_gross_pnl() {
        let (mut position, rules) = open_position(100.0, 0.07);
        position.close(day(5), 108.0, ExitReason::EarlyProfit);

        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_reason, Some(ExitReason::EarlyProfit));
        assert!((position.pnl - 80.0).abs() < 1e-9);
        assert!((position.pnl_pct - 8.0).abs() < 1e-9);
        assert_eq!(position.evaluate_exit(day(6), 200.0, &rules), None);
    }
}
