//! Engine configuration.

use std::time::Duration;

use recast_common::{Currency, CurrencyPair, DurationExt, constants};
use recast_fx::{ExchangeRateApiProvider, RateCacheConfig};
use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};

/// Timers driving the pipeline.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Quiet period after the last notification before a pass runs.
    pub debounce: Duration,
    /// Delay between a pass and the annotation that follows it.
    pub settle: Duration,
    /// Delay between activation and the first full pass.
    pub initial_delay: Duration,
    /// Period of the rate refresh timer.
    pub refresh_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce: constants::debounce_window().as_std(),
            settle: constants::settle_delay().as_std(),
            initial_delay: constants::initial_delay().as_std(),
            refresh_interval: constants::refresh_interval().as_std(),
        }
    }
}

/// Labels and search bounds used by the percentage annotator.
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Label of the current period figure.
    pub current_label: String,
    /// Label of the prior period figure.
    pub prior_label: String,
    /// Maximum ancestors climbed from a label to find its section.
    pub section_depth: usize,
    /// Maximum depth below the section searched for the value element.
    pub value_depth: usize,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            current_label: "This month so far".to_string(),
            prior_label: "Last month".to_string(),
            section_depth: 10,
            value_depth: 5,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currency found in the page.
    pub source_currency: Currency,
    /// Currency written back.
    pub target_currency: Currency,
    /// Lifetime of a fetched rate.
    pub rate_ttl: chrono::Duration,
    /// Rate used when the provider is unreachable.
    pub fallback_rate: Decimal,
    /// Base URL of the rate API.
    pub rate_api_url: String,
    /// Upper-case tags whose subtrees hold no visible text.
    pub skip_tags: Vec<String>,
    pub timing: TimingConfig,
    pub annotator: AnnotatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cache = RateCacheConfig::default();
        Self {
            source_currency: cache.pair.base,
            target_currency: cache.pair.quote,
            rate_ttl: cache.ttl,
            fallback_rate: cache.fallback_rate,
            rate_api_url: ExchangeRateApiProvider::DEFAULT_BASE_URL.to_string(),
            skip_tags: ["SCRIPT", "STYLE", "NOSCRIPT", "CODE"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            timing: TimingConfig::default(),
            annotator: AnnotatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(code) = var("RECAST_SOURCE_CURRENCY") {
            config.source_currency =
                Currency::parse(&code).map_err(|e| EngineError::Config(e.to_string()))?;
        }
        if let Some(code) = var("RECAST_TARGET_CURRENCY") {
            config.target_currency =
                Currency::parse(&code).map_err(|e| EngineError::Config(e.to_string()))?;
        }
        if let Some(ms) = parsed::<u64>("RECAST_DEBOUNCE_MS")? {
            config.timing.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>("RECAST_SETTLE_MS")? {
            config.timing.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>("RECAST_INITIAL_DELAY_MS")? {
            config.timing.initial_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parsed::<u64>("RECAST_REFRESH_SECS")? {
            config.timing.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(hours) = parsed::<i64>("RECAST_RATE_TTL_HOURS")? {
            config.rate_ttl = chrono::Duration::hours(hours);
        }
        if let Some(rate) = parsed::<Decimal>("RECAST_FALLBACK_RATE")? {
            config.fallback_rate = rate;
        }
        if let Some(url) = var("RECAST_RATE_API_URL") {
            config.rate_api_url = url;
        }
        if let Some(label) = var("RECAST_CURRENT_LABEL") {
            config.annotator.current_label = label;
        }
        if let Some(label) = var("RECAST_PRIOR_LABEL") {
            config.annotator.prior_label = label;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_currency == self.target_currency {
            return Err("Source and target currency must differ".to_string());
        }

        if self.fallback_rate <= Decimal::ZERO {
            return Err("Fallback rate must be positive".to_string());
        }

        if self.rate_ttl <= chrono::Duration::zero() {
            return Err("Rate TTL must be positive".to_string());
        }

        if self.timing.refresh_interval.is_zero() {
            return Err("Refresh interval cannot be 0".to_string());
        }

        if self.annotator.current_label.is_empty() || self.annotator.prior_label.is_empty() {
            return Err("Annotator labels cannot be empty".to_string());
        }

        if self.annotator.current_label == self.annotator.prior_label {
            return Err("Annotator labels must differ".to_string());
        }

        Ok(())
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.source_currency.clone(), self.target_currency.clone())
    }

    /// Rate cache settings derived from this configuration.
    pub fn rate_cache(&self) -> RateCacheConfig {
        RateCacheConfig {
            pair: self.pair(),
            ttl: self.rate_ttl,
            fallback_rate: self.fallback_rate,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> EngineResult<Option<T>> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{name} has an invalid value: {raw}"))),
        None => Ok(None),
    }
}
