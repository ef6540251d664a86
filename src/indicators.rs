use crate::models::{Bar, SignalAction};

/// Lookahead window (bars) for the forward-return label.
pub const LABEL_HORIZON: usize = 15;
/// Forward return above this labels a bar BUY, below the negative labels SELL.
pub const LABEL_THRESHOLD_PCT: f64 = 5.0;

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 {
        return vec![prices[0]; prices.len()];
    }
    if period == 1 {
        return prices.to_vec();
    }
    if prices.len() < period {
        return vec![prices[0]; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        sma_values.push(prices[0]);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::new();
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 || prices.len() < period + 1 {
        return vec![50.0; prices.len()];
    }

    let mut rsi_values = vec![50.0; prices.len()];
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let mut macd_line = Vec::new();
    for i in 0..prices.len() {
        macd_line.push(fast_ema[i] - slow_ema[i]);
    }

    let signal_line = calculate_ema(&macd_line, signal_period);

    let mut histogram = Vec::new();
    for i in 0..macd_line.len() {
        histogram.push(macd_line[i] - signal_line[i]);
    }

    (macd_line, signal_line, histogram)
}

/// Fills the indicator columns (RSI-14, EMA-10, EMA-20, MACD) and the
/// forward-return signal label on a date-ordered bar series. Bars inside the
/// final label horizon keep `signal = None` because their future close is
/// unknown.
pub fn enrich_bars(bars: &mut [Bar]) {
    if bars.is_empty() {
        return;
    }

    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let rsi = calculate_rsi(&closes, 14);
    let ema_10 = calculate_ema(&closes, 10);
    let ema_20 = calculate_ema(&closes, 20);
    let (macd_line, _, _) = calculate_macd(&closes, 12, 26, 9);

    for (i, bar) in bars.iter_mut().enumerate() {
        bar.rsi = Some(rsi[i]);
        bar.ema_10 = Some(ema_10[i]);
        bar.ema_20 = Some(ema_20[i]);
        bar.macd = Some(macd_line[i]);

        bar.signal = if i + LABEL_HORIZON < closes.len() {
            let future_return_pct =
                (closes[i + LABEL_HORIZON] - closes[i]) / closes[i] * 100.0;
            Some(if future_return_pct > LABEL_THRESHOLD_PCT {
                SignalAction::Buy
            } else if future_return_pct < -LABEL_THRESHOLD_PCT {
                SignalAction::Sell
            } else {
                SignalAction::Hold
            })
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar_series(closes: &[f64]) -> Vec<Bar> {
        let base = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                ticker: "TEST".to_string(),
                date: base + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume_shares: 1_000,
                rsi: None,
                ema_10: None,
                ema_20: None,
                macd: None,
                signal: None,
            })
            .collect()
    }

    #[test]
    fn sma_matches_rolling_average() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&prices, 3);
        assert_eq!(sma.len(), prices.len());
        assert!((sma[2] - 2.0).abs() < 1e-9);
        assert!((sma[4] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_saturates_on_monotone_series() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let rsi = calculate_rsi(&rising, 14);
        assert!(rsi[rising.len() - 1] > 99.0);

        let falling: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let rsi = calculate_rsi(&falling, 14);
        assert!(rsi[falling.len() - 1] < 1.0);
    }

    #[test]
    fn enrich_labels_strong_risers_as_buy() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let mut bars = bar_series(&closes);
        enrich_bars(&mut bars);

        // +1% per day compounds past the +5% label threshold over 15 bars.
        assert_eq!(bars[0].signal, Some(SignalAction::Buy));
        // Final horizon has no future close to label against.
        assert_eq!(bars[59].signal, None);
        assert!(bars.iter().all(|bar| bar.rsi.is_some() && bar.macd.is_some()));
    }

    #[test]
    fn enrich_labels_flat_series_as_hold() {
        let mut bars = bar_series(&vec![50.0; 40]);
        enrich_bars(&mut bars);
        assert_eq!(bars[0].signal, Some(SignalAction::Hold));
    }
}
