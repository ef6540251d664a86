pub mod backtest;
pub mod enrich_snapshot;
pub mod paper;
