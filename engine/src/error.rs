//! Engine error types.

use recast_fx::FxError;
use recast_tree::TreeError;
use thiserror::Error;

/// Errors raised inside a pass. Passes absorb them; they surface only in logs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("FX error: {0}")]
    Fx(#[from] FxError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
