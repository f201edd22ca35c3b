//! Error types shared across the Recast crates.

use thiserror::Error;

/// Errors raised while assembling the engine.
#[derive(Error, Debug)]
pub enum RecastError {
    /// Currency outside the supported symbol/code vocabulary.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecastError::UnsupportedCurrency("XYZ".into());
        assert_eq!(err.to_string(), "Unsupported currency: XYZ");
    }
}
