use crate::error::EngineError;
use crate::models::Bar;
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Supplies an ordered, deduplicated daily bar series per instrument. The one
/// I/O boundary of the simulation: batch mode materializes everything through
/// this trait before any replay begins.
pub trait MarketDataProvider: Send + Sync {
    /// Bars for the trailing `period_days` window, oldest first. Fails with
    /// `DataUnavailable` when the instrument has no usable series.
    fn bars(&self, ticker: &str, period_days: usize) -> Result<Vec<Bar>, EngineError>;
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    bars: Vec<Bar>,
}

/// In-memory bar store keyed by ticker; doubles as the snapshot-file format.
#[derive(Default)]
pub struct BarStore {
    bars_by_ticker: HashMap<String, Vec<Bar>>,
}

impl BarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loose bars, grouping by ticker, sorting by date and
    /// dropping same-day duplicates (first occurrence wins).
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        let mut store = Self::new();
        let mut grouped: HashMap<String, Vec<Bar>> = HashMap::new();
        for bar in bars {
            let Some(ticker) = normalize_ticker_symbol(&bar.ticker) else {
                continue;
            };
            grouped.entry(ticker).or_default().push(bar);
        }
        for (ticker, series) in grouped {
            store.insert_series(&ticker, series);
        }
        store
    }

    pub fn insert_series(&mut self, ticker: &str, mut series: Vec<Bar>) {
        let Some(ticker) = normalize_ticker_symbol(ticker) else {
            return;
        };
        for bar in &mut series {
            bar.ticker = ticker.clone();
        }
        series.sort_by(|a, b| a.date.cmp(&b.date));
        series.dedup_by(|next, prev| next.date == prev.date);
        self.bars_by_ticker.insert(ticker, series);
    }

    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.bars_by_ticker.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub fn series(&self, ticker: &str) -> Option<&[Bar]> {
        let normalized = normalize_ticker_symbol(ticker)?;
        self.bars_by_ticker
            .get(&normalized)
            .map(|series| series.as_slice())
    }

    pub fn total_bars(&self) -> usize {
        self.bars_by_ticker.values().map(|series| series.len()).sum()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let file = File::open(path.as_ref())
            .map_err(|error| EngineError::SnapshotFormat(error.to_string()))?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot = bincode::deserialize_from(reader)
            .map_err(|error| EngineError::SnapshotFormat(error.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let store = Self::from_bars(snapshot.bars);
        info!(
            "Loaded market data snapshot: {} tickers, {} bars (generated {})",
            store.bars_by_ticker.len(),
            store.total_bars(),
            snapshot.generated_at
        );
        Ok(store)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let mut bars = Vec::with_capacity(self.total_bars());
        for ticker in self.tickers() {
            bars.extend(self.bars_by_ticker[&ticker].iter().cloned());
        }
        let snapshot = MarketDataSnapshot {
            version: SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            bars,
        };

        let file = File::create(path.as_ref())
            .map_err(|error| EngineError::SnapshotFormat(error.to_string()))?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &snapshot)
            .map_err(|error| EngineError::SnapshotFormat(error.to_string()))
    }
}

impl MarketDataProvider for BarStore {
    fn bars(&self, ticker: &str, period_days: usize) -> Result<Vec<Bar>, EngineError> {
        let normalized =
            normalize_ticker_symbol(ticker).ok_or_else(|| EngineError::DataUnavailable {
                ticker: ticker.to_string(),
            })?;
        let series = self
            .bars_by_ticker
            .get(&normalized)
            .filter(|series| !series.is_empty())
            .ok_or_else(|| EngineError::DataUnavailable {
                ticker: normalized.clone(),
            })?;

        let last_date = series.last().expect("series is non-empty").date;
        let cutoff = last_date - Duration::days(period_days as i64);
        let windowed: Vec<Bar> = series
            .iter()
            .filter(|bar| bar.date >= cutoff)
            .cloned()
            .collect();

        if windowed.is_empty() {
            return Err(EngineError::DataUnavailable { ticker: normalized });
        }
        Ok(windowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(ticker: &str, day_offset: i64, close: f64) -> Bar {
        let base = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        Bar {
            ticker: ticker.to_string(),
            date: base + Duration::days(day_offset),
            open: close,
            high: close,
            low: close,
            close,
            volume_shares: 500,
            rsi: None,
            ema_10: None,
            ema_20: None,
            macd: None,
            signal: None,
        }
    }

    #[test]
    fn store_sorts_and_deduplicates_series() {
        let store = BarStore::from_bars(vec![
            bar("aaa", 2, 102.0),
            bar("AAA", 0, 100.0),
            bar("AAA", 2, 103.0),
            bar("AAA", 1, 101.0),
        ]);

        let series = store.bars("AAA", 3650).unwrap();
        assert_eq!(series.len(), 3);
        assert!(series.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn missing_ticker_is_data_unavailable() {
        let store = BarStore::new();
        let error = store.bars("ZZZ", 365).unwrap_err();
        assert!(matches!(error, EngineError::DataUnavailable { .. }));
    }

    #[test]
    fn period_window_trims_leading_history() {
        let bars: Vec<Bar> = (0..100).map(|i| bar("AAA", i, 100.0 + i as f64)).collect();
        let store = BarStore::from_bars(bars);

        let series = store.bars("AAA", 10).unwrap();
        assert_eq!(series.len(), 11);
        assert_eq!(series.last().unwrap().close, 199.0);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let bars: Vec<Bar> = (0..5).map(|i| bar("AAA", i, 100.0 + i as f64)).collect();
        let store = BarStore::from_bars(bars);

        let dir = std::env::temp_dir().join("swingcraft-snapshot-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bars.bin");
        store.save(&path).unwrap();

        let loaded = BarStore::load(&path).unwrap();
        assert_eq!(loaded.tickers(), vec!["AAA".to_string()]);
        assert_eq!(loaded.total_bars(), 5);
        std::fs::remove_file(&path).ok();
    }
}
