use crate::error::EngineError;
use crate::retry::retry_fetch_operation;
use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const QUOTE_TIMEOUT: Duration = Duration::from_secs(10);
const API_KEY_HEADER: &str = "x-api-key";

/// Latest-price collaborator for live mode. Implementations must time out on
/// their own; the caller treats any error as "skip this ticker this cycle".
pub trait QuoteSource: Send + Sync {
    fn latest_price(
        &self,
        ticker: &str,
    ) -> impl std::future::Future<Output = Result<f64, EngineError>> + Send;
}

/// HTTP quote client: one JSON endpoint per ticker, optional header auth,
/// per-request timeout and jittered retries.
pub struct QuoteClient {
    http: Client,
    base_url: String,
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(default)]
    symbol: Option<String>,
    price: f64,
}

impl QuoteClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let http = Client::builder()
            .timeout(QUOTE_TIMEOUT)
            .build()
            .context("failed to build quote HTTP client")?;

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(key).context("invalid quote API key")?,
            );
        }

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<f64> {
        let url = format!("{}/quotes/{}", self.base_url, ticker);
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .with_context(|| format!("quote request for {} failed", ticker))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("quote endpoint returned {} for {}", status, ticker));
        }

        let payload: QuotePayload = response
            .json()
            .await
            .with_context(|| format!("invalid quote payload for {}", ticker))?;

        if let Some(symbol) = payload.symbol.as_deref() {
            if !symbol.eq_ignore_ascii_case(ticker) {
                return Err(anyhow!(
                    "quote endpoint answered for {} instead of {}",
                    symbol,
                    ticker
                ));
            }
        }
        if !payload.price.is_finite() || payload.price <= 0.0 {
            return Err(anyhow!("unusable quote price {} for {}", payload.price, ticker));
        }

        debug!("Quote for {}: {:.4}", ticker, payload.price);
        Ok(payload.price)
    }
}

impl QuoteSource for QuoteClient {
    async fn latest_price(&self, ticker: &str) -> Result<f64, EngineError> {
        let context = format!("fetching quote for {}", ticker);
        retry_fetch_operation!(context, self.fetch_quote(ticker)).map_err(|error| {
            EngineError::PriceFetchError {
                ticker: ticker.to_string(),
                source: error,
            }
        })
    }
}
