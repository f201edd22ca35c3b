//! Rate provider trait and implementations.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use recast_common::CurrencyPair;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Source of live exchange rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch the current mid rate for `pair` (units of quote per unit of base).
    async fn fetch(&self, pair: &CurrencyPair) -> FxResult<Decimal>;
}

/// Body of the `/v4/latest/{BASE}` endpoint.
#[derive(Debug, Deserialize)]
struct LatestRates {
    rates: HashMap<String, f64>,
}

/// Provider backed by the exchangerate-api.com v4 "latest" endpoint.
pub struct ExchangeRateApiProvider {
    client: Client,
    base_url: String,
}

impl ExchangeRateApiProvider {
    /// Public endpoint used when nothing else is configured.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.exchangerate-api.com";

    /// Create a provider against `base_url`.
    pub fn new(base_url: impl Into<String>) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("recast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FxError::ProviderError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn latest_url(&self, pair: &CurrencyPair) -> String {
        format!(
            "{}/v4/latest/{}",
            self.base_url.trim_end_matches('/'),
            pair.base.code()
        )
    }

    /// Extract the quote rate from a `latest` response body.
    pub fn parse_latest(body: &str, pair: &CurrencyPair) -> FxResult<Decimal> {
        let latest: LatestRates = serde_json::from_str(body)
            .map_err(|e| FxError::MalformedResponse(e.to_string()))?;

        let raw = latest
            .rates
            .get(pair.quote.code())
            .copied()
            .ok_or_else(|| FxError::RateNotAvailable(pair.clone()))?;

        // f64 Display is the shortest round-trip form, so 1.17 stays 1.17.
        let value = Decimal::from_str(&raw.to_string())
            .map_err(|e| FxError::MalformedResponse(e.to_string()))?;

        if value <= Decimal::ZERO {
            return Err(FxError::InvalidRate {
                pair: pair.clone(),
                value: value.to_string(),
            });
        }

        Ok(value)
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiProvider {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    async fn fetch(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        let url = self.latest_url(pair);
        debug!(url = %url, pair = %pair, "Fetching exchange rate");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FxError::ProviderError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FxError::ProviderError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FxError::ProviderError(e.to_string()))?;

        Self::parse_latest(&body, pair)
    }
}

/// Provider that always answers with a configured rate.
/// Used for offline runs and as a test double; counts how often it was asked.
pub struct StaticRateProvider {
    rate: RwLock<Decimal>,
    calls: AtomicUsize,
}

impl StaticRateProvider {
    /// Create a provider answering `rate`.
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate: RwLock::new(rate),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the rate returned by subsequent fetches.
    pub fn set_rate(&self, rate: Decimal) {
        *self.rate.write() = rate;
    }

    /// Number of fetches served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _pair: &CurrencyPair) -> FxResult<Decimal> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.rate.read())
    }
}

/// Provider that always fails, for exercising the fallback path.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct FailingRateProvider {
    calls: AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl FailingRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for FailingRateProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn fetch(&self, _pair: &CurrencyPair) -> FxResult<Decimal> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(FxError::ProviderError("Failed to fetch exchange rate".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_latest() {
        let body = r#"{"base":"GBP","date":"2024-05-01","rates":{"GBP":1,"EUR":1.17,"USD":1.25}}"#;
        let rate = ExchangeRateApiProvider::parse_latest(body, &CurrencyPair::default()).unwrap();
        assert_eq!(rate, dec!(1.17));
    }

    #[test]
    fn test_parse_latest_missing_quote() {
        let body = r#"{"rates":{"USD":1.25}}"#;
        let result = ExchangeRateApiProvider::parse_latest(body, &CurrencyPair::default());
        assert!(matches!(result, Err(FxError::RateNotAvailable(_))));
    }

    #[test]
    fn test_parse_latest_rejects_garbage() {
        let result = ExchangeRateApiProvider::parse_latest("<html>", &CurrencyPair::default());
        assert!(matches!(result, Err(FxError::MalformedResponse(_))));

        let zero = r#"{"rates":{"EUR":0}}"#;
        let result = ExchangeRateApiProvider::parse_latest(zero, &CurrencyPair::default());
        assert!(matches!(result, Err(FxError::InvalidRate { .. })));
    }

    #[test]
    fn test_latest_url() {
        let provider = ExchangeRateApiProvider::new("http://localhost:9000/").unwrap();
        assert_eq!(
            provider.latest_url(&CurrencyPair::default()),
            "http://localhost:9000/v4/latest/GBP"
        );
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticRateProvider::new(dec!(1.17));
        let pair = CurrencyPair::default();

        assert_eq!(provider.fetch(&pair).await.unwrap(), dec!(1.17));
        provider.set_rate(dec!(1.20));
        assert_eq!(provider.fetch(&pair).await.unwrap(), dec!(1.20));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_provider() {
        let provider = FailingRateProvider::new();
        assert!(provider.fetch(&CurrencyPair::default()).await.is_err());
        assert_eq!(provider.calls(), 1);
    }
}
