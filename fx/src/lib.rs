//! Recast FX
//!
//! Exchange rate handling for the currency rewrite engine.
//!
//! # Features
//!
//! - Pluggable rate providers (HTTP, static)
//! - A persisted rate cache with a 24 hour TTL and a fallback constant
//! - Conversion and monetary/percentage formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recast_fx::{ExchangeRateApiProvider, MemoryStore, RateCache, RateCacheConfig, Converter};
//!
//! let provider = Arc::new(ExchangeRateApiProvider::new("https://api.exchangerate-api.com")?);
//! let cache = RateCache::new(provider, Arc::new(MemoryStore::new()), RateCacheConfig::default());
//! cache.refresh_if_stale().await;
//!
//! let converter = Converter::new(cache.pair().clone());
//! let eur = converter.convert(dec!(1234.56), cache.get_rate().as_ref())?;
//! assert_eq!(Converter::format(eur, &converter.pair().quote), "€1,444.44");
//! ```

pub mod provider;
pub mod store;
pub mod cache;
pub mod conversion;
pub mod error;

pub use provider::{ExchangeRateApiProvider, RateProvider, StaticRateProvider};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::FailingRateProvider;
pub use store::{FileStore, MemoryStore, RateKeys, RateStore};
pub use cache::{ConversionRate, RateCache, RateCacheConfig, RateSource, RefreshOutcome, SharedRateCache};
pub use conversion::{format_percentage, Converter};
pub use error::{FxError, FxResult};
