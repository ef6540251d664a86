use crate::classifier::SignalForecast;
use dashmap::DashMap;
use std::sync::Arc;

/// Caller-owned memo for per-ticker classifier forecasts, keyed by ticker plus
/// a configuration fingerprint. Nothing is cached implicitly: the caller
/// passes the cache in and invalidates it when the underlying bars change.
#[derive(Clone, Default)]
pub struct SignalCache {
    entries: Arc<DashMap<String, Arc<SignalForecast>>>,
}

impl SignalCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(ticker: &str, fingerprint: &str) -> String {
        format!("{}:{}", ticker, fingerprint)
    }

    pub fn get(&self, ticker: &str, fingerprint: &str) -> Option<Arc<SignalForecast>> {
        self.entries
            .get(&Self::cache_key(ticker, fingerprint))
            .map(|entry| entry.clone())
    }

    pub fn store(&self, fingerprint: &str, forecast: SignalForecast) -> Arc<SignalForecast> {
        let key = Self::cache_key(&forecast.ticker, fingerprint);
        let shared = Arc::new(forecast);
        self.entries.insert(key, shared.clone());
        shared
    }

    /// Drop every cached forecast for one ticker, across all fingerprints.
    pub fn invalidate(&self, ticker: &str) {
        let prefix = format!("{}:", ticker);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(ticker: &str) -> SignalForecast {
        SignalForecast {
            ticker: ticker.to_string(),
            classifier: "nearest_centroid",
            test_len: 3,
            predictions: Vec::new(),
        }
    }

    #[test]
    fn store_and_get_are_keyed_by_ticker_and_fingerprint() {
        let cache = SignalCache::new();
        cache.store("fp-a", forecast("AAA"));

        assert!(cache.get("AAA", "fp-a").is_some());
        assert!(cache.get("AAA", "fp-b").is_none());
        assert!(cache.get("BBB", "fp-a").is_none());
    }

    #[test]
    fn invalidate_removes_only_that_ticker() {
        let cache = SignalCache::new();
        cache.store("fp-a", forecast("AAA"));
        cache.store("fp-b", forecast("AAA"));
        cache.store("fp-a", forecast("BBB"));

        cache.invalidate("AAA");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("BBB", "fp-a").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
