//! FX error types.

use recast_common::CurrencyPair;
use thiserror::Error;

/// Errors that can occur while obtaining or applying a rate.
#[derive(Debug, Error)]
pub enum FxError {
    /// No rate is loaded for the requested currency pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// A rate was obtained but is not usable.
    #[error("Invalid rate for {pair}: {value}")]
    InvalidRate { pair: CurrencyPair, value: String },

    /// Provider returned an error.
    #[error("Rate provider error: {0}")]
    ProviderError(String),

    /// Provider answered with a body we could not read.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// The persisted key-value store failed.
    #[error("Rate store error: {0}")]
    StoreError(String),
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
