//! Recast Engine
//!
//! Finds source-currency amounts in a live document tree, rewrites them in
//! the target currency and keeps the tree converted as it changes.
//!
//! # Components
//!
//! - [`AmountExtractor`]: multi-rule amount scanner with overlap resolution
//! - [`RewriteEngine`]: right-to-left text rewriting and region marking
//! - [`ChangeWatcher`]: debounced batching of changed roots
//! - [`PercentageAnnotator`]: current/prior period badges
//! - [`Engine`]: owns the state and runs passes
//! - [`Pipeline`]: async driver with timers, mutation feed and navigation
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = Arc::new(RateCache::new(provider, store, config.rate_cache()));
//! let engine = Engine::new(config, cache)?;
//! let handle = PipelineHandle::spawn(engine, tree.clone(), "/home");
//! handle.navigate("/reports");
//! let engine = handle.shutdown().await?;
//! ```

pub mod annotator;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod markers;
pub mod metrics;
pub mod pipeline;
pub mod rewrite;
pub mod state;
pub mod watcher;

pub use annotator::{BadgePlacement, PercentageAnnotator, Polarity, BADGE_ATTR};
pub use config::{AnnotatorConfig, EngineConfig, TimingConfig};
pub use engine::{Engine, PassReport};
pub use error::{EngineError, EngineResult};
pub use extractor::{AmountExtractor, AmountMatch};
pub use markers::{BadgeLedger, Mark, MarkerSet};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use pipeline::{Pipeline, PipelineHandle, SharedTree};
pub use rewrite::{RegionOutcome, RewriteEngine, CONVERTED_ATTR};
pub use state::WatcherState;
pub use watcher::ChangeWatcher;
