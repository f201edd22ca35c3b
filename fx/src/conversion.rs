//! Applying a rate and formatting the result for display.

use recast_common::{Currency, CurrencyPair};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::cache::ConversionRate;
use crate::error::{FxError, FxResult};

/// Converts base-currency amounts into the quote currency.
#[derive(Debug, Clone)]
pub struct Converter {
    pair: CurrencyPair,
}

impl Converter {
    pub fn new(pair: CurrencyPair) -> Self {
        Self { pair }
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    /// Apply `rate` to `amount`. Fails when no rate is loaded; callers leave the text as is.
    pub fn convert(&self, amount: Decimal, rate: Option<&ConversionRate>) -> FxResult<Decimal> {
        let rate = rate.ok_or_else(|| FxError::RateNotAvailable(self.pair.clone()))?;
        if rate.pair != self.pair {
            return Err(FxError::RateNotAvailable(self.pair.clone()));
        }
        Ok(amount * rate.value)
    }

    /// Convert and format in the quote currency in one step.
    pub fn convert_display(&self, amount: Decimal, rate: Option<&ConversionRate>) -> FxResult<String> {
        let converted = self.convert(amount, rate)?;
        Ok(Self::format(converted, &self.pair.quote))
    }

    /// Symbol-prefixed, comma-grouped, fixed decimals: `€1,444.44`.
    pub fn format(amount: Decimal, currency: &Currency) -> String {
        let places = currency.decimal_places();
        let rounded = amount.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
        let sign = if rounded < Decimal::ZERO { "-" } else { "" };

        let digits = format!("{:.*}", places as usize, rounded.abs());
        let (integer, fraction) = match digits.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (digits.as_str(), None),
        };

        let prefix = match currency.symbol() {
            Some(symbol) => symbol.to_string(),
            None => format!("{} ", currency.code()),
        };

        let mut out = format!("{}{}{}", sign, prefix, group_thousands(integer));
        if let Some(fraction) = fraction {
            out.push('.');
            out.push_str(fraction);
        }
        out
    }
}

/// Leading sign and one decimal: `+18.9%`, `-4.2%`.
pub fn format_percentage(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
    if rounded < Decimal::ZERO {
        format!("-{:.1}%", rounded.abs())
    } else {
        format!("+{:.1}%", rounded.abs())
    }
}

fn group_thousands(integer: &str) -> String {
    let len = integer.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RateSource;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn rate(value: Decimal) -> ConversionRate {
        ConversionRate {
            pair: CurrencyPair::default(),
            value,
            fetched_at: Utc::now(),
            ttl: Duration::hours(24),
            source: RateSource::Live,
        }
    }

    #[test]
    fn test_convert() {
        let converter = Converter::new(CurrencyPair::default());
        let converted = converter.convert(dec!(1234.56), Some(&rate(dec!(1.17)))).unwrap();
        assert_eq!(converted, dec!(1444.4352));
    }

    #[test]
    fn test_convert_without_rate() {
        let converter = Converter::new(CurrencyPair::default());
        assert!(matches!(
            converter.convert(dec!(1), None),
            Err(FxError::RateNotAvailable(_))
        ));
    }

    #[test]
    fn test_format() {
        let eur = Currency::eur();
        assert_eq!(Converter::format(dec!(1444.4352), &eur), "€1,444.44");
        assert_eq!(Converter::format(dec!(0), &eur), "€0.00");
        assert_eq!(Converter::format(dec!(0.005), &eur), "€0.01");
        assert_eq!(Converter::format(dec!(999999.999), &eur), "€1,000,000.00");
        assert_eq!(Converter::format(dec!(12), &Currency::new("JPY")), "JPY 12");
    }

    #[test]
    fn test_convert_display_zero() {
        let converter = Converter::new(CurrencyPair::default());
        let text = converter.convert_display(dec!(0), Some(&rate(dec!(1.17)))).unwrap();
        assert_eq!(text, "€0.00");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(dec!(18.88)), "+18.9%");
        assert_eq!(format_percentage(dec!(-4.24)), "-4.2%");
        assert_eq!(format_percentage(dec!(-0.04)), "+0.0%");
        assert_eq!(format_percentage(dec!(0)), "+0.0%");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands("1"), "1");
        assert_eq!(group_thousands("1000"), "1,000");
        assert_eq!(group_thousands("123456"), "123,456");
        assert_eq!(group_thousands("1234567"), "1,234,567");
    }
}
