//! Rate cache with a persisted entry, a TTL and a fallback constant.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use recast_common::{constants, from_millis, to_millis, Clock, CurrencyPair, SystemClock, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::error::FxError;
use crate::provider::RateProvider;
use crate::store::{RateKeys, RateStore};

/// Where the current rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSource {
    /// Read back from the durable store.
    Persisted,
    /// Fetched from the provider during this session.
    Live,
    /// The configured constant, installed after a failed fetch.
    Fallback,
}

/// A rate together with its freshness information.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRate {
    pub pair: CurrencyPair,
    pub value: Decimal,
    pub fetched_at: Timestamp,
    pub ttl: Duration,
    pub source: RateSource,
}

impl ConversionRate {
    /// A fallback rate is always stale so the next refresh retries the provider.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        self.source == RateSource::Fallback || now.signed_duration_since(self.fetched_at) >= self.ttl
    }
}

/// Configuration for the rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// Pair converted by the engine.
    pub pair: CurrencyPair,
    /// Lifetime of a fetched rate.
    pub ttl: Duration,
    /// Approximate rate used when the provider is unreachable.
    pub fallback_rate: Decimal,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            pair: CurrencyPair::default(),
            ttl: constants::rate_ttl(),
            fallback_rate: Decimal::new(117, 2),
        }
    }
}

/// Result of a refresh attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    /// Value before the refresh, if one was loaded.
    pub previous: Option<Decimal>,
    /// Value after the refresh.
    pub current: Decimal,
    pub source: RateSource,
}

impl RefreshOutcome {
    /// Whether a previously loaded rate was replaced by a different value.
    pub fn changed(&self) -> bool {
        self.previous.map_or(false, |previous| previous != self.current)
    }
}

/// Holds the single current rate used by the engine.
pub struct RateCache {
    provider: Arc<dyn RateProvider>,
    store: Arc<dyn RateStore>,
    clock: Arc<dyn Clock>,
    keys: RateKeys,
    current: RwLock<Option<ConversionRate>>,
    config: RateCacheConfig,
}

impl RateCache {
    /// Create a cache reading the system clock.
    pub fn new(
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn RateStore>,
        config: RateCacheConfig,
    ) -> Self {
        Self::with_clock(provider, store, config, Arc::new(SystemClock))
    }

    /// Create a cache with a custom clock.
    pub fn with_clock(
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn RateStore>,
        config: RateCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys: RateKeys::for_pair(&config.pair),
            provider,
            store,
            clock,
            current: RwLock::new(None),
            config,
        }
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.config.pair
    }

    /// The last loaded rate, `None` before the first refresh.
    pub fn get_rate(&self) -> Option<ConversionRate> {
        self.current.read().clone()
    }

    /// Load a rate unless the in-memory one is still fresh.
    #[instrument(skip(self), fields(pair = %self.config.pair))]
    pub async fn refresh_if_stale(&self) -> RefreshOutcome {
        let now = self.clock.now();
        let previous = self.get_rate();

        if let Some(rate) = previous.as_ref().filter(|r| !r.is_stale(now)) {
            debug!(rate = %rate.value, "In-memory rate still fresh");
            return RefreshOutcome {
                previous: Some(rate.value),
                current: rate.value,
                source: rate.source,
            };
        }

        let next = match self.read_persisted(now) {
            Some(rate) => rate,
            None => self.fetch_live().await,
        };
        self.install(previous, next)
    }

    /// Fetch from the provider regardless of freshness.
    #[instrument(skip(self), fields(pair = %self.config.pair))]
    pub async fn force_refresh(&self) -> RefreshOutcome {
        let previous = self.get_rate();
        let next = self.fetch_live().await;
        self.install(previous, next)
    }

    fn install(&self, previous: Option<ConversionRate>, next: ConversionRate) -> RefreshOutcome {
        let outcome = RefreshOutcome {
            previous: previous.map(|r| r.value),
            current: next.value,
            source: next.source,
        };
        info!(
            rate = %next.value,
            source = ?next.source,
            changed = outcome.changed(),
            "Exchange rate loaded"
        );
        *self.current.write() = Some(next);
        outcome
    }

    /// Read the persisted pair; any failure behaves as a miss.
    fn read_persisted(&self, now: Timestamp) -> Option<ConversionRate> {
        let value = self.read_key(&self.keys.value)?;
        let millis = self.read_key(&self.keys.timestamp)?;

        let value = Decimal::from_str(value.trim()).ok().filter(|v| *v > Decimal::ZERO)?;
        let fetched_at = millis.trim().parse::<i64>().ok().and_then(from_millis)?;

        let rate = ConversionRate {
            pair: self.config.pair.clone(),
            value,
            fetched_at,
            ttl: self.config.ttl,
            source: RateSource::Persisted,
        };

        if rate.is_stale(now) {
            debug!(fetched_at = %fetched_at, "Persisted rate expired");
            return None;
        }
        debug!(rate = %value, fetched_at = %fetched_at, "Using persisted rate");
        Some(rate)
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Rate store read failed");
                None
            }
        }
    }

    async fn fetch_live(&self) -> ConversionRate {
        let pair = &self.config.pair;
        let fetched = self
            .provider
            .fetch(pair)
            .await
            .and_then(|value| {
                if value > Decimal::ZERO {
                    Ok(value)
                } else {
                    Err(FxError::InvalidRate {
                        pair: pair.clone(),
                        value: value.to_string(),
                    })
                }
            });

        // Fallback rates are never persisted.
        let now = self.clock.now();
        match fetched {
            Ok(value) => {
                self.persist(value, now);
                ConversionRate {
                    pair: pair.clone(),
                    value,
                    fetched_at: now,
                    ttl: self.config.ttl,
                    source: RateSource::Live,
                }
            }
            Err(e) => {
                warn!(
                    provider = self.provider.name(),
                    error = %e,
                    fallback = %self.config.fallback_rate,
                    "Failed to fetch exchange rate, using fallback rate"
                );
                ConversionRate {
                    pair: pair.clone(),
                    value: self.config.fallback_rate,
                    fetched_at: now,
                    ttl: self.config.ttl,
                    source: RateSource::Fallback,
                }
            }
        }
    }

    fn persist(&self, value: Decimal, at: Timestamp) {
        let writes = self
            .store
            .set(&self.keys.value, &value.to_string())
            .and_then(|_| self.store.set(&self.keys.timestamp, &to_millis(at).to_string()));
        if let Err(e) = writes {
            debug!(error = %e, "Rate store write failed");
        }
    }
}

/// Shared rate cache.
pub type SharedRateCache = Arc<RateCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FailingRateProvider, StaticRateProvider};
    use crate::store::MemoryStore;
    use recast_common::ManualClock;
    use rust_decimal_macros::dec;

    struct Fixture {
        provider: Arc<StaticRateProvider>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        cache: RateCache,
    }

    fn fixture(rate: Decimal) -> Fixture {
        let provider = Arc::new(StaticRateProvider::new(rate));
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(from_millis(1_700_000_000_000).unwrap()));
        let cache = RateCache::with_clock(
            provider.clone(),
            store.clone(),
            RateCacheConfig::default(),
            clock.clone(),
        );
        Fixture {
            provider,
            store,
            clock,
            cache,
        }
    }

    fn seed_store(f: &Fixture, value: &str, age: Duration) {
        let keys = RateKeys::for_pair(&CurrencyPair::default());
        let written = f.clock.now() - age;
        f.store.set(&keys.value, value).unwrap();
        f.store.set(&keys.timestamp, &to_millis(written).to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_no_rate_before_refresh() {
        let f = fixture(dec!(1.17));
        assert!(f.cache.get_rate().is_none());
    }

    #[tokio::test]
    async fn test_fresh_persisted_rate_skips_fetch() {
        let f = fixture(dec!(1.30));
        seed_store(&f, "1.17", Duration::hours(23) + Duration::minutes(59));

        let outcome = f.cache.refresh_if_stale().await;

        assert_eq!(f.provider.calls(), 0);
        assert_eq!(outcome.current, dec!(1.17));
        assert_eq!(outcome.source, RateSource::Persisted);
        assert!(!outcome.changed());
    }

    #[tokio::test]
    async fn test_expired_persisted_rate_triggers_fetch() {
        let f = fixture(dec!(1.18));
        seed_store(&f, "1.17", Duration::hours(24) + Duration::minutes(1));

        let outcome = f.cache.refresh_if_stale().await;

        assert_eq!(f.provider.calls(), 1);
        assert_eq!(outcome.current, dec!(1.18));
        assert_eq!(outcome.source, RateSource::Live);
    }

    #[tokio::test]
    async fn test_fetch_persists_rate() {
        let f = fixture(dec!(1.17));
        f.cache.refresh_if_stale().await;

        let keys = RateKeys::for_pair(&CurrencyPair::default());
        assert_eq!(f.store.get(&keys.value).unwrap().as_deref(), Some("1.17"));
        assert_eq!(
            f.store.get(&keys.timestamp).unwrap(),
            Some(to_millis(f.clock.now()).to_string())
        );
    }

    #[tokio::test]
    async fn test_in_memory_rate_reused_until_stale() {
        let f = fixture(dec!(1.17));
        f.cache.refresh_if_stale().await;
        f.clock.advance(Duration::hours(1));
        f.cache.refresh_if_stale().await;
        assert_eq!(f.provider.calls(), 1);

        f.provider.set_rate(dec!(1.20));
        f.clock.advance(Duration::hours(24));
        let outcome = f.cache.refresh_if_stale().await;

        assert_eq!(f.provider.calls(), 2);
        assert!(outcome.changed());
        assert_eq!(outcome.previous, Some(dec!(1.17)));
        assert_eq!(f.cache.get_rate().unwrap().value, dec!(1.20));
    }

    #[tokio::test]
    async fn test_corrupt_store_is_a_miss() {
        let f = fixture(dec!(1.19));
        seed_store(&f, "not-a-number", Duration::minutes(5));

        let outcome = f.cache.refresh_if_stale().await;

        assert_eq!(f.provider.calls(), 1);
        assert_eq!(outcome.current, dec!(1.19));
    }

    #[tokio::test]
    async fn test_fetch_failure_uses_fallback() {
        let provider = Arc::new(FailingRateProvider::new());
        let store = Arc::new(MemoryStore::new());
        let cache = RateCache::new(provider.clone(), store.clone(), RateCacheConfig::default());

        let outcome = cache.refresh_if_stale().await;

        assert_eq!(outcome.current, dec!(1.17));
        assert_eq!(outcome.source, RateSource::Fallback);
        assert!(store.is_empty());

        // The fallback never counts as fresh.
        cache.refresh_if_stale().await;
        assert_eq!(provider.calls(), 2);
    }

    struct BrokenStore;

    impl RateStore for BrokenStore {
        fn get(&self, _key: &str) -> crate::FxResult<Option<String>> {
            Err(FxError::StoreError("unavailable".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> crate::FxResult<()> {
            Err(FxError::StoreError("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_ignored() {
        let provider = Arc::new(StaticRateProvider::new(dec!(1.17)));
        let cache = RateCache::new(provider, Arc::new(BrokenStore), RateCacheConfig::default());

        let outcome = cache.refresh_if_stale().await;

        assert_eq!(outcome.current, dec!(1.17));
        assert_eq!(outcome.source, RateSource::Live);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_freshness() {
        let f = fixture(dec!(1.17));
        f.cache.refresh_if_stale().await;
        f.provider.set_rate(dec!(1.20));

        let outcome = f.cache.force_refresh().await;

        assert!(outcome.changed());
        assert_eq!(f.provider.calls(), 2);
    }
}
