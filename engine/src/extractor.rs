//! Locating currency-tagged amounts in free text.

use std::str::FromStr;

use recast_common::CurrencyMarkers;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineResult;

/// Digits with grouping commas between digits and an optional fraction.
pub(crate) const NUMBER: &str = r"[0-9](?:[0-9,]*[0-9])?(?:\.[0-9]+)?";

/// Amounts at or above this bound are not treated as money.
const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// A located amount. Offsets are byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmountMatch {
    /// The full matched text, markers included.
    pub raw_text: String,
    pub value: Decimal,
    pub start: usize,
    pub len: usize,
}

impl AmountMatch {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end() && self.start < end
    }
}

#[derive(Debug)]
struct Rule {
    name: &'static str,
    pattern: Regex,
}

/// Multi-rule amount scanner for one currency.
///
/// Rules are tried in priority order. A candidate is kept when no earlier
/// match starts at the same offset or overlaps its range.
#[derive(Debug)]
pub struct AmountExtractor {
    markers: CurrencyMarkers,
    rules: Vec<Rule>,
}

impl AmountExtractor {
    pub fn new(markers: &CurrencyMarkers) -> EngineResult<Self> {
        let symbol = regex::escape(&markers.symbol);
        let code = regex::escape(&markers.code);

        let mut specs: Vec<(&'static str, String)> = Vec::new();
        if !markers.symbol.is_empty() {
            specs.push(("symbol_prefix", format!(r"{symbol}\s*({NUMBER})")));
            specs.push(("symbol_suffix", format!(r"({NUMBER})\s*{symbol}")));
        }
        if !markers.code.is_empty() {
            specs.push(("code_prefix", format!(r"(?i){code}\s*({NUMBER})")));
            specs.push(("code_suffix", format!(r"(?i)({NUMBER})\s*{code}")));
        }
        if !markers.symbol.is_empty() {
            specs.push((
                "symbol_grouped",
                format!(r"{symbol}\s*([0-9]{{1,3}}(?:,[0-9]{{3}})*(?:\.[0-9]{{2}})?)"),
            ));
            specs.push(("symbol_two_decimals", format!(r"{symbol}\s*([0-9]+\.[0-9]{{2}})")));
            specs.push(("symbol_short_decimals", format!(r"{symbol}\s*([0-9]+\.[0-9]{{1,2}})")));
        }

        let rules = specs
            .into_iter()
            .map(|(name, source)| Ok(Rule { name, pattern: Regex::new(&source)? }))
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Self {
            markers: markers.clone(),
            rules,
        })
    }

    pub fn markers(&self) -> &CurrencyMarkers {
        &self.markers
    }

    /// Cheap pre-check: symbol present, or the code in any case.
    pub fn contains_marker(&self, text: &str) -> bool {
        self.markers.appear_in(text)
    }

    /// All accepted matches, ascending by start offset.
    pub fn extract(&self, text: &str) -> Vec<AmountMatch> {
        if !self.contains_marker(text) {
            return Vec::new();
        }

        let mut accepted: Vec<AmountMatch> = Vec::new();
        // Numerals out of range; later rules must not accept a fragment of one.
        let mut rejected: Vec<(usize, usize)> = Vec::new();
        for rule in &self.rules {
            for caps in rule.pattern.captures_iter(text) {
                let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let (start, end) = (whole.start(), whole.end());
                if accepted.iter().any(|m| m.start == start || m.overlaps(start, end))
                    || rejected
                        .iter()
                        .any(|&(s, e)| number.start() < e && s < number.end())
                {
                    continue;
                }
                let Some(value) = parse_amount(number.as_str()) else {
                    tracing::trace!(rule = rule.name, raw = number.as_str(), "Discarding numeral");
                    rejected.push((number.start(), number.end()));
                    continue;
                };
                accepted.push(AmountMatch {
                    raw_text: whole.as_str().to_string(),
                    value,
                    start,
                    len: end - start,
                });
            }
        }

        accepted.sort_by_key(|m| m.start);
        accepted
    }

    /// Value of the earliest match, if any.
    pub fn first_amount(&self, text: &str) -> Option<Decimal> {
        self.extract(text).first().map(|m| m.value)
    }
}

/// Strip grouping separators and apply the range filter.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    Decimal::from_str(&cleaned)
        .ok()
        .filter(|v| *v >= Decimal::ZERO && *v < MAX_AMOUNT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use recast_common::Currency;
    use rust_decimal_macros::dec;

    fn gbp() -> AmountExtractor {
        AmountExtractor::new(&Currency::gbp().markers()).unwrap()
    }

    #[test]
    fn test_symbol_prefixed_grouped() {
        let matches = gbp().extract("Revenue: £1,234.56 today");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].raw_text, "£1,234.56");
        assert_eq!(matches[0].value, dec!(1234.56));
        assert_eq!(matches[0].start, 9);
        assert_eq!(matches[0].len, "£1,234.56".len());
    }

    #[test]
    fn test_all_marker_forms() {
        let text = "a £1.50, b 2£, c GBP 3, d 4 gbp.";
        let values: Vec<Decimal> = gbp().extract(text).into_iter().map(|m| m.value).collect();

        assert_eq!(values, vec![dec!(1.50), dec!(2), dec!(3), dec!(4)]);
    }

    #[test]
    fn test_trailing_punctuation_not_swallowed() {
        let matches = gbp().extract("Costs £5, then £6.");

        assert_eq!(matches[0].raw_text, "£5");
        assert_eq!(matches[1].raw_text, "£6");
    }

    #[test]
    fn test_range_filter() {
        let extractor = gbp();
        assert!(extractor.extract("£1,000,000").is_empty());
        assert!(extractor.extract("£2000000.00").is_empty());
        assert_eq!(extractor.extract("£999,999.99")[0].value, dec!(999999.99));
        assert_eq!(extractor.extract("£0")[0].value, dec!(0));
    }

    #[test]
    fn test_no_marker_no_match() {
        assert!(gbp().extract("1,234.56 and €5").is_empty());
        assert!(gbp().first_amount("nothing here").is_none());
    }

    #[test]
    fn test_prefix_wins_over_suffix_overlap() {
        // "5 £10": the suffix rule would claim "5 £", the prefix rule claims "£10" first.
        let matches = gbp().extract("5 £10");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].raw_text, "£10");
    }

    #[test]
    fn test_rejected_numeral_not_partially_matched() {
        let extractor = gbp();
        assert!(extractor.extract("£1234567").is_empty());
        assert!(extractor.extract("£99999999999999999999999999999999").is_empty());
        assert!(extractor.extract("Total £1234567.89 due").is_empty());

        let matches = extractor.extract("£1234567 then £5");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].raw_text, "£5");

        let matches = extractor.extract("5 GBP 2000000");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].raw_text, "5 GBP");
    }

    #[test]
    fn test_code_and_symbol_rules_share_text() {
        let matches = gbp().extract("GBP 5 £6");
        let found: Vec<(&str, Decimal)> = matches
            .iter()
            .map(|m| (m.raw_text.as_str(), m.value))
            .collect();

        assert_eq!(found, vec![("GBP 5", dec!(5)), ("£6", dec!(6))]);
    }

    #[test]
    fn test_first_amount_target_currency() {
        let eur = AmountExtractor::new(&Currency::eur().markers()).unwrap();
        assert_eq!(eur.first_amount("This month so far €29.72 and €3"), Some(dec!(29.72)));
    }

    proptest! {
        #[test]
        fn prop_matches_never_overlap(text in "[£0-9., GBPgbp]{0,40}") {
            let matches = gbp().extract(&text);
            for pair in matches.windows(2) {
                prop_assert!(pair[0].end() <= pair[1].start);
            }
            for m in &matches {
                prop_assert!(m.value >= Decimal::ZERO && m.value < MAX_AMOUNT);
                prop_assert_eq!(&text[m.start..m.end()], m.raw_text.as_str());
            }
        }
    }
}
