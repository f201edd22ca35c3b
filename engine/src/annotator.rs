//! Percentage-delta badges next to period figures.

use std::collections::HashMap;

use recast_common::{Currency, NodeId};
use recast_fx::format_percentage;
use recast_tree::{ancestors, is_within, walk, HostTree, TreeError, Visit};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AnnotatorConfig;
use crate::error::EngineResult;
use crate::extractor::{parse_amount, AmountExtractor, NUMBER};
use crate::markers::{BadgeLedger, Mark, MarkerSet};

/// Attribute identifying inserted badges in the host.
pub const BADGE_ATTR: &str = "data-recast-badge";

/// Figures closer than this are considered equal when locating the value element.
const VALUE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

const BADGE_BASE_STYLE: &str = "display: inline-block; margin-left: 6px; padding: 3px 10px; \
     border-radius: 12px; font-size: 0.85em; font-weight: 600; white-space: nowrap;";

/// Direction of the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    fn of(percentage: Decimal) -> Self {
        if percentage >= Decimal::ZERO {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }

    fn style(&self) -> String {
        let (background, color) = match self {
            Polarity::Positive => ("#e8f5e9", "#2e7d32"),
            Polarity::Negative => ("#ffebee", "#c62828"),
        };
        format!("{BADGE_BASE_STYLE} background-color: {background}; color: {color};")
    }
}

/// A badge inserted by one annotation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgePlacement {
    pub section: NodeId,
    pub badge: NodeId,
    pub current: Decimal,
    pub prior: Decimal,
    pub percentage: Decimal,
    pub polarity: Polarity,
    pub text: String,
}

/// Locates current/prior figure pairs and annotates each section once.
#[derive(Debug)]
pub struct PercentageAnnotator {
    config: AnnotatorConfig,
    amounts: AmountExtractor,
    current_label: Regex,
    prior_label: Regex,
    current_labeled: Regex,
    prior_labeled: Regex,
}

impl PercentageAnnotator {
    /// Build an annotator reading figures written in `target`.
    pub fn new(config: AnnotatorConfig, target: &Currency) -> EngineResult<Self> {
        let markers = target.markers();
        let symbol = if markers.symbol.is_empty() {
            String::new()
        } else {
            format!("(?:{})?", regex::escape(&markers.symbol))
        };
        let labeled = |label: &str| {
            Regex::new(&format!(r"(?i){}[:\s]+{symbol}\s*({NUMBER})", regex::escape(label)))
        };
        let plain = |label: &str| Regex::new(&format!("(?i){}", regex::escape(label)));

        Ok(Self {
            amounts: AmountExtractor::new(&markers)?,
            current_label: plain(&config.current_label)?,
            prior_label: plain(&config.prior_label)?,
            current_labeled: labeled(&config.current_label)?,
            prior_labeled: labeled(&config.prior_label)?,
            config,
        })
    }

    /// Find the (current, prior) figures in a section's text.
    ///
    /// Tries `<label>: <amount>` for both labels first. Otherwise reads line by
    /// line: the first amount after the label on its line, else the first amount
    /// on the following line.
    pub fn figures(&self, text: &str) -> Option<(Decimal, Decimal)> {
        let labeled = |re: &Regex| {
            re.captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| parse_amount(m.as_str()))
        };
        if let (Some(current), Some(prior)) =
            (labeled(&self.current_labeled), labeled(&self.prior_labeled))
        {
            return Some((current, prior));
        }

        let lines: Vec<&str> = text.split('\n').map(str::trim).collect();
        let by_line = |label: &Regex| {
            lines.iter().enumerate().find_map(|(i, line)| {
                let found = label.find(line)?;
                self.amounts
                    .first_amount(&line[found.end()..])
                    .or_else(|| lines.get(i + 1).and_then(|next| self.amounts.first_amount(next)))
            })
        };
        Some((by_line(&self.current_label)?, by_line(&self.prior_label)?))
    }

    /// Annotate every section under `root` that is not annotated yet.
    pub fn annotate<T: HostTree + ?Sized>(
        &self,
        tree: &mut T,
        markers: &mut MarkerSet,
        ledger: &mut BadgeLedger,
        root: NodeId,
    ) -> EngineResult<Vec<BadgePlacement>> {
        ledger.prune_detached(&*tree);
        if !tree.contains(root) {
            return Ok(Vec::new());
        }

        let mut placements = Vec::new();
        for section in self.sections(&*tree, ledger, root) {
            let text = tree.text_content(section);
            let Some((current, prior)) = self.figures(&text) else {
                debug!(%section, "Section figures not found");
                continue;
            };
            let Some(percentage) = percentage_change(current, prior) else {
                debug!(%section, current = %current, prior = %prior, "Percentage change not computable");
                continue;
            };
            let placement = self.insert_badge(tree, section, current, prior, percentage)?;
            ledger.record(section, placement.badge);
            markers.mark(placement.badge, Mark::Scanned);
            info!(
                %section,
                current = %current,
                prior = %prior,
                change = %placement.text.trim(),
                "Percentage badge added"
            );
            placements.push(placement);
        }
        Ok(placements)
    }

    /// Distinct, non-nested sections holding both labels, in document order.
    fn sections<T: HostTree + ?Sized>(&self, tree: &T, ledger: &BadgeLedger, root: NodeId) -> Vec<NodeId> {
        let (current, prior) = (&self.config.current_label, &self.config.prior_label);
        let leaves = walk(tree, root, |t, node| {
            if ledger.is_badge_region(t, node) {
                return Visit::Prune;
            }
            match t.text(node) {
                Some(text) if text.contains(current.as_str()) || text.contains(prior.as_str()) => {
                    Visit::Accept
                }
                _ => Visit::Skip,
            }
        });

        let mut sections: Vec<NodeId> = Vec::new();
        for leaf in leaves {
            let section = ancestors(tree, leaf)
                .take(self.config.section_depth)
                .find(|candidate| {
                    let text = tree.text_content(*candidate);
                    text.contains(current.as_str()) && text.contains(prior.as_str())
                });
            let Some(section) = section else {
                continue;
            };
            let nested = |other: &NodeId| is_within(tree, section, *other) || is_within(tree, *other, section);
            if ledger.is_annotated(section)
                || sections.iter().any(nested)
                || self.annotated_nearby(tree, ledger, section)
            {
                continue;
            }
            sections.push(section);
        }
        sections
    }

    /// A section nested in, or holding, an annotated one is already covered.
    fn annotated_nearby<T: HostTree + ?Sized>(&self, tree: &T, ledger: &BadgeLedger, section: NodeId) -> bool {
        ancestors(tree, section).any(|a| ledger.is_annotated(a))
            || walk(tree, section, |_, node| {
                if node != section && ledger.is_annotated(node) {
                    Visit::AcceptSubtree
                } else {
                    Visit::Skip
                }
            })
            .first()
            .is_some()
    }

    fn insert_badge<T: HostTree + ?Sized>(
        &self,
        tree: &mut T,
        section: NodeId,
        current: Decimal,
        prior: Decimal,
        percentage: Decimal,
    ) -> EngineResult<BadgePlacement> {
        let polarity = Polarity::of(percentage);
        let text = format!(" {}", format_percentage(percentage));
        let style = polarity.style();

        let anchor = self
            .anchor(&*tree, section, current)
            .filter(|anchor| tree.parent(*anchor).is_some());
        if !tree.is_element(section) {
            return Err(TreeError::NotAnElement(section).into());
        }

        let badge = tree.create_element(
            "span",
            &[
                (BADGE_ATTR, "true"),
                ("data-polarity", polarity.as_str()),
                ("style", style.as_str()),
            ],
        );
        let content = tree.create_text(&text);
        tree.append_child(badge, content)?;

        match anchor {
            Some(anchor) => tree.insert_after(anchor, badge)?,
            None => tree.append_child(section, badge)?,
        }

        Ok(BadgePlacement {
            section,
            badge,
            current,
            prior,
            percentage,
            polarity,
            text,
        })
    }

    /// Element the badge goes after: the deepest element at or after the current
    /// label whose first amount equals the current figure, else the label's parent.
    fn anchor<T: HostTree + ?Sized>(&self, tree: &T, section: NodeId, current: Decimal) -> Option<NodeId> {
        let order = walk(tree, section, |_, _| Visit::Accept);
        let label = order.iter().copied().find(|node| {
            tree.text(*node)
                .map_or(false, |t| t.contains(self.config.current_label.as_str()))
        })?;
        let label_parent = tree.parent(label).filter(|p| *p != section);

        let scope = std::iter::once(label)
            .chain(ancestors(tree, label))
            .take_while(|n| *n != section)
            .take(self.config.value_depth + 1)
            .last()
            .unwrap_or(label);

        let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let label_at = position.get(&label).copied().unwrap_or(0);

        let value = walk(tree, scope, |t, node| {
            if t.is_element(node) {
                Visit::Accept
            } else {
                Visit::Prune
            }
        })
        .into_iter()
        .filter(|node| {
            let after = position.get(node).map_or(false, |at| *at > label_at);
            after || is_within(tree, label, *node)
        })
        .filter(|node| {
            self.amounts
                .first_amount(&tree.text_content(*node))
                .map_or(false, |amount| (amount - current).abs() < VALUE_TOLERANCE)
        })
        .max_by(|a, b| {
            let depth = |n: &NodeId| ancestors(tree, *n).count();
            depth(a)
                .cmp(&depth(b))
                .then_with(|| position.get(b).cmp(&position.get(a)))
        });

        value.or(label_parent)
    }
}

/// `(current - prior) / prior * 100`, or `None` when `prior` is not positive or
/// the result does not fit a `Decimal`.
fn percentage_change(current: Decimal, prior: Decimal) -> Option<Decimal> {
    if prior <= Decimal::ZERO {
        return None;
    }
    current
        .checked_sub(prior)?
        .checked_div(prior)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_tree::Document;
    use rust_decimal_macros::dec;

    fn annotator() -> PercentageAnnotator {
        PercentageAnnotator::new(AnnotatorConfig::default(), &Currency::eur()).unwrap()
    }

    /// `<div><div><span>This month so far</span><span>€29.72</span></div>
    ///  <div><span>Last month</span><span>€25.00</span></div></div>`
    fn earnings_card(doc: &mut Document) -> (NodeId, NodeId) {
        let root = doc.root();
        let card = doc.add_element(root, "div");
        let row = doc.add_element(card, "div");
        let label = doc.add_element(row, "span");
        doc.add_text(label, "This month so far");
        let value = doc.add_element(row, "span");
        doc.add_text(value, "€29.72");
        let prior_row = doc.add_element(card, "div");
        let prior_label = doc.add_element(prior_row, "span");
        doc.add_text(prior_label, "Last month");
        let prior_value = doc.add_element(prior_row, "span");
        doc.add_text(prior_value, "€25.00");
        (card, value)
    }

    #[test]
    fn test_figures_labeled() {
        let figures = annotator().figures("This month so far: €29.72\nLast month €25.00");
        assert_eq!(figures, Some((dec!(29.72), dec!(25.00))));
    }

    #[test]
    fn test_figures_next_line() {
        let text = "This month so far\n€1,029.72\nLast month\n25.00 EUR";
        assert_eq!(annotator().figures(text), Some((dec!(1029.72), dec!(25.00))));
    }

    #[test]
    fn test_figures_run_together() {
        let text = "This month so far€29.72Last month€25.00";
        assert_eq!(annotator().figures(text), Some((dec!(29.72), dec!(25.00))));
    }

    #[test]
    fn test_figures_missing() {
        assert_eq!(annotator().figures("This month so far €3"), None);
    }

    #[test]
    fn test_badge_inserted_after_value() {
        let mut doc = Document::new();
        let (card, value) = earnings_card(&mut doc);
        let mut markers = MarkerSet::new();
        let mut ledger = BadgeLedger::new();

        let root = doc.root();
        let placements = annotator()
            .annotate(&mut doc, &mut markers, &mut ledger, root)
            .unwrap();

        assert_eq!(placements.len(), 1);
        let placement = &placements[0];
        assert_eq!(placement.section, card);
        assert_eq!(placement.text, " +18.9%");
        assert_eq!(placement.polarity, Polarity::Positive);

        let row = doc.parent(value).unwrap();
        assert_eq!(doc.children(row)[2], placement.badge);
        assert_eq!(doc.attribute(placement.badge, "data-polarity"), Some("positive"));
        assert!(doc
            .attribute(placement.badge, "style")
            .unwrap()
            .contains("background-color: #e8f5e9"));
        assert_eq!(markers.get(placement.badge), Some(&Mark::Scanned));
        assert_eq!(ledger.badge_for(card), Some(placement.badge));
    }

    #[test]
    fn test_annotation_is_idempotent() {
        let mut doc = Document::new();
        earnings_card(&mut doc);
        let annotator = annotator();
        let mut markers = MarkerSet::new();
        let mut ledger = BadgeLedger::new();

        let root = doc.root();
        annotator.annotate(&mut doc, &mut markers, &mut ledger, root).unwrap();
        let html = doc.to_html(root);
        let again = annotator.annotate(&mut doc, &mut markers, &mut ledger, root).unwrap();

        assert!(again.is_empty());
        assert_eq!(doc.to_html(doc.root()), html);
    }

    #[test]
    fn test_negative_change() {
        let mut doc = Document::new();
        let root = doc.root();
        let card = doc.add_element(root, "div");
        doc.add_text(card, "This month so far: €20.00\nLast month: €25.00");

        let placements = annotator()
            .annotate(&mut doc, &mut MarkerSet::new(), &mut BadgeLedger::new(), root)
            .unwrap();

        assert_eq!(placements[0].text, " -20.0%");
        assert_eq!(placements[0].polarity, Polarity::Negative);
        assert_eq!(doc.children(card).last(), Some(&placements[0].badge));
    }

    #[test]
    fn test_zero_prior_skipped() {
        let mut doc = Document::new();
        let root = doc.root();
        let card = doc.add_element(root, "div");
        doc.add_text(card, "This month so far: €20.00\nLast month: €0.00");

        let placements = annotator()
            .annotate(&mut doc, &mut MarkerSet::new(), &mut BadgeLedger::new(), root)
            .unwrap();
        assert!(placements.is_empty());
    }

    #[test]
    fn test_two_sections_annotated_once_each() {
        let mut doc = Document::new();
        earnings_card(&mut doc);
        earnings_card(&mut doc);

        let root = doc.root();
        let placements = annotator()
            .annotate(&mut doc, &mut MarkerSet::new(), &mut BadgeLedger::new(), root)
            .unwrap();
        assert_eq!(placements.len(), 2);
        assert_ne!(placements[0].section, placements[1].section);
    }

    #[test]
    fn test_tiny_prior_skipped_without_panic() {
        let mut doc = Document::new();
        let root = doc.root();
        let card = doc.add_element(root, "div");
        doc.add_text(
            card,
            "This month so far: €900000.00\nLast month: €0.0000000000000000000000000001",
        );
        let nodes = doc.len();

        let placements = annotator()
            .annotate(&mut doc, &mut MarkerSet::new(), &mut BadgeLedger::new(), root)
            .unwrap();

        assert!(placements.is_empty());
        assert_eq!(doc.len(), nodes);
    }

    #[test]
    fn test_percentage_change() {
        assert_eq!(percentage_change(dec!(29.72), dec!(25.00)).map(|p| p.round_dp(1)), Some(dec!(18.9)));
        assert_eq!(percentage_change(dec!(5), dec!(0)), None);
        assert_eq!(percentage_change(dec!(5), dec!(-1)), None);
        assert_eq!(percentage_change(dec!(900000), dec!(0.0000000000000000000000000001)), None);
    }
}
