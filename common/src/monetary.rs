//! Currency types shared by the rate and rewrite layers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RecastError;

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse a currency code, rejecting anything outside the supported vocabulary.
    pub fn parse(code: &str) -> Result<Self, RecastError> {
        let currency = Self::new(code.trim());
        if currency.symbol().is_none() {
            return Err(RecastError::UnsupportedCurrency(currency.0));
        }
        Ok(currency)
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Display symbol used in running text.
    pub fn symbol(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "GBP" => Some("£"),
            "EUR" => Some("€"),
            "USD" => Some("$"),
            _ => None,
        }
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" => 0,
            _ => 2,
        }
    }

    /// The markers that tag an amount as being in this currency.
    pub fn markers(&self) -> CurrencyMarkers {
        CurrencyMarkers {
            symbol: self.symbol().unwrap_or_default().to_string(),
            code: self.0.clone(),
        }
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Symbol and code that tag a numeral as a monetary amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyMarkers {
    /// Symbol such as `£`. Empty when the currency has none.
    pub symbol: String,
    /// Upper-case ISO code such as `GBP`.
    pub code: String,
}

impl CurrencyMarkers {
    /// Whether `text` carries the symbol or (case-insensitively) the code.
    pub fn appear_in(&self, text: &str) -> bool {
        if !self.symbol.is_empty() && text.contains(self.symbol.as_str()) {
            return true;
        }
        !self.code.is_empty() && text.to_uppercase().contains(self.code.as_str())
    }
}

/// A currency pair for FX operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency (the one found in the page).
    pub base: Currency,
    /// Quote currency (the one displayed after rewriting).
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }
}

impl Default for CurrencyPair {
    fn default() -> Self {
        Self::new(Currency::gbp(), Currency::eur())
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_symbols() {
        assert_eq!(Currency::gbp().symbol(), Some("£"));
        assert_eq!(Currency::eur().symbol(), Some("€"));
        assert_eq!(Currency::new("chf").symbol(), None);
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse(" gbp ").unwrap(), Currency::gbp());
        assert!(matches!(
            Currency::parse("XYZ"),
            Err(RecastError::UnsupportedCurrency(code)) if code == "XYZ"
        ));
    }

    #[test]
    fn test_markers_appear_in() {
        let markers = Currency::gbp().markers();
        assert!(markers.appear_in("Total £4"));
        assert!(markers.appear_in("4 gbp"));
        assert!(!markers.appear_in("€4.00"));
    }

    #[test]
    fn test_pair_display() {
        assert_eq!(CurrencyPair::default().to_string(), "GBP/EUR");
    }
}
