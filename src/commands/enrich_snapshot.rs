use crate::indicators::enrich_bars;
use crate::market_data::BarStore;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// Offline stand-in for the external indicator pipeline: fills indicator
/// columns and forward-return labels on a raw snapshot and writes it back.
pub fn run(input: &Path, output: &Path) -> Result<()> {
    let store = BarStore::load(input)
        .with_context(|| format!("loading market data from {}", input.display()))?;

    let mut enriched = BarStore::new();
    for ticker in store.tickers() {
        let mut bars = store
            .series(&ticker)
            .map(|series| series.to_vec())
            .unwrap_or_default();
        enrich_bars(&mut bars);
        enriched.insert_series(&ticker, bars);
    }

    enriched
        .save(output)
        .with_context(|| format!("writing enriched snapshot to {}", output.display()))?;
    info!(
        "Enriched {} ticker(s) / {} bar(s) into {}",
        enriched.tickers().len(),
        enriched.total_bars(),
        output.display()
    );
    Ok(())
}
