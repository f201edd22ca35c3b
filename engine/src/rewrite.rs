//! In-place rewriting of source-currency amounts.

use recast_common::NodeId;
use recast_fx::{ConversionRate, Converter};
use recast_tree::{ancestors, walk, HostTree, NodeKind, TreeError, Visit};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::EngineResult;
use crate::extractor::{AmountExtractor, AmountMatch};
use crate::markers::{Mark, MarkerSet};

/// Attribute set on wrapper elements so rewritten text is visible in the host.
pub const CONVERTED_ATTR: &str = "data-recast-converted";

/// Tag of the wrapper element replacing a converted text leaf.
const WRAPPER_TAG: &str = "span";

/// What a region rewrite did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionOutcome {
    pub amounts_converted: usize,
    pub nodes_rewritten: usize,
    /// The region was not touched (gone, already marked, hidden, or no rate).
    pub skipped: bool,
}

impl RegionOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Rewrites amounts found by an [`AmountExtractor`] into converted values.
#[derive(Debug)]
pub struct RewriteEngine {
    extractor: AmountExtractor,
    converter: Converter,
    skip_tags: Vec<String>,
}

impl RewriteEngine {
    pub fn new(extractor: AmountExtractor, converter: Converter, skip_tags: Vec<String>) -> Self {
        Self {
            extractor,
            converter,
            skip_tags,
        }
    }

    pub fn extractor(&self) -> &AmountExtractor {
        &self.extractor
    }

    /// Replace each convertible match, right to left. `None` when nothing converted.
    pub fn rewrite_text(
        &self,
        text: &str,
        matches: &[AmountMatch],
        rate: Option<&ConversionRate>,
    ) -> Option<String> {
        self.rewrite_counted(text, matches, rate).map(|(text, _)| text)
    }

    fn rewrite_counted(
        &self,
        text: &str,
        matches: &[AmountMatch],
        rate: Option<&ConversionRate>,
    ) -> Option<(String, usize)> {
        let mut ordered: Vec<&AmountMatch> = matches.iter().collect();
        ordered.sort_by(|a, b| b.start.cmp(&a.start));

        let mut out = text.to_string();
        let mut converted = 0;
        for m in ordered {
            if text.get(m.start..m.end()) != Some(m.raw_text.as_str()) {
                trace!(start = m.start, raw = %m.raw_text, "Match does not line up with text");
                continue;
            }
            match self.converter.convert_display(m.value, rate) {
                Ok(formatted) => {
                    out.replace_range(m.start..m.end(), &formatted);
                    converted += 1;
                }
                Err(e) => debug!(error = %e, raw = %m.raw_text, "Leaving amount unconverted"),
            }
        }

        (converted > 0).then_some((out, converted))
    }

    /// Rewrite every unprocessed amount under `root` and mark what was handled.
    pub fn apply_to_region<T: HostTree + ?Sized>(
        &self,
        tree: &mut T,
        markers: &mut MarkerSet,
        root: NodeId,
        rate: Option<&ConversionRate>,
    ) -> EngineResult<RegionOutcome> {
        if rate.is_none() || !tree.contains(root) {
            return Ok(RegionOutcome::skipped());
        }
        if let Some(marked) = markers.covering(&*tree, root) {
            trace!(%root, %marked, "Region already processed");
            return Ok(RegionOutcome::skipped());
        }
        if ancestors(&*tree, root).any(|a| self.is_hidden(&*tree, a)) {
            return Ok(RegionOutcome::skipped());
        }

        let targets = {
            let view: &T = tree;
            let marks: &MarkerSet = markers;
            walk(view, root, |t, node| self.classify(t, marks, node))
        };

        let mut outcome = RegionOutcome::default();
        for node in targets {
            match tree.kind(node) {
                Some(NodeKind::Element) => self.rewrite_container(tree, markers, node, rate, &mut outcome)?,
                Some(NodeKind::Text) => self.rewrite_leaf(tree, markers, node, rate, &mut outcome)?,
                None => {}
            }
        }

        if tree.is_element(root) {
            markers.mark_scanned(root);
        }

        debug!(
            %root,
            amounts = outcome.amounts_converted,
            nodes = outcome.nodes_rewritten,
            "Region reconciled"
        );
        Ok(outcome)
    }

    fn classify<T: HostTree + ?Sized>(&self, tree: &T, markers: &MarkerSet, node: NodeId) -> Visit {
        if markers.contains(node) {
            return Visit::Prune;
        }
        match tree.kind(node) {
            Some(NodeKind::Element) => {
                if self.is_hidden(tree, node) {
                    Visit::Prune
                } else if node != tree.root()
                    && self.extractor.contains_marker(&tree.text_content(node))
                    && is_flat(tree, node)
                {
                    Visit::AcceptSubtree
                } else {
                    Visit::Skip
                }
            }
            Some(NodeKind::Text) => match tree.text(node) {
                Some(text) if self.extractor.contains_marker(text) => Visit::Accept,
                _ => Visit::Skip,
            },
            None => Visit::Prune,
        }
    }

    fn rewrite_container<T: HostTree + ?Sized>(
        &self,
        tree: &mut T,
        markers: &mut MarkerSet,
        container: NodeId,
        rate: Option<&ConversionRate>,
        outcome: &mut RegionOutcome,
    ) -> EngineResult<()> {
        let original = tree.text_content(container);
        let matches = self.extractor.extract(&original);
        match self.rewrite_counted(&original, &matches, rate) {
            Some((text, converted)) => {
                tree.set_element_text(container, &text)?;
                markers.mark(container, Mark::Container { original });
                outcome.amounts_converted += converted;
                outcome.nodes_rewritten += 1;
            }
            None => markers.mark_scanned(container),
        }
        Ok(())
    }

    fn rewrite_leaf<T: HostTree + ?Sized>(
        &self,
        tree: &mut T,
        markers: &mut MarkerSet,
        leaf: NodeId,
        rate: Option<&ConversionRate>,
        outcome: &mut RegionOutcome,
    ) -> EngineResult<()> {
        let original = tree.text(leaf).unwrap_or_default().to_string();
        let matches = self.extractor.extract(&original);
        match self.rewrite_counted(&original, &matches, rate) {
            Some((text, converted)) => {
                if tree.parent(leaf).is_none() {
                    return Err(TreeError::Detached(leaf).into());
                }
                let wrapper = tree.create_element(WRAPPER_TAG, &[(CONVERTED_ATTR, "true")]);
                let content = tree.create_text(&text);
                tree.append_child(wrapper, content)?;
                tree.replace_node(leaf, wrapper)?;
                markers.mark(wrapper, Mark::Wrapper { original });
                outcome.amounts_converted += converted;
                outcome.nodes_rewritten += 1;
            }
            None => markers.mark_scanned(leaf),
        }
        Ok(())
    }

    fn is_hidden<T: HostTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        tree.tag(node)
            .map_or(false, |tag| self.skip_tags.iter().any(|s| s.eq_ignore_ascii_case(tag)))
    }
}

/// No descendant element carries non-whitespace text.
fn is_flat<T: HostTree + ?Sized>(tree: &T, element: NodeId) -> bool {
    walk(tree, element, |t, node| {
        if node == element {
            Visit::Skip
        } else if !t.is_element(node) {
            Visit::Prune
        } else if t.text_content(node).trim().is_empty() {
            Visit::Skip
        } else {
            Visit::AcceptSubtree
        }
    })
    .is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use recast_common::{Currency, CurrencyPair};
    use recast_fx::RateSource;
    use recast_tree::Document;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn rate(value: Decimal) -> ConversionRate {
        ConversionRate {
            pair: CurrencyPair::default(),
            value,
            fetched_at: recast_common::now(),
            ttl: chrono::Duration::hours(24),
            source: RateSource::Live,
        }
    }

    fn engine() -> RewriteEngine {
        RewriteEngine::new(
            AmountExtractor::new(&Currency::gbp().markers()).unwrap(),
            Converter::new(CurrencyPair::default()),
            vec!["SCRIPT".into(), "STYLE".into(), "NOSCRIPT".into(), "CODE".into()],
        )
    }

    fn rewrite(text: &str, value: Decimal) -> Option<String> {
        let engine = engine();
        let matches = engine.extractor().extract(text);
        engine.rewrite_text(text, &matches, Some(&rate(value)))
    }

    #[test]
    fn test_rewrite_text_examples() {
        assert_eq!(
            rewrite("Revenue: £1,234.56 today", dec!(1.17)).as_deref(),
            Some("Revenue: €1,444.44 today")
        );
        assert_eq!(rewrite("£0", dec!(1.17)).as_deref(), Some("€0.00"));
        assert_eq!(
            rewrite("£1 and 2 GBP", dec!(1.17)).as_deref(),
            Some("€1.17 and €2.34")
        );
        assert_eq!(rewrite("no money", dec!(1.17)), None);
    }

    #[test]
    fn test_rewrite_text_without_rate() {
        let engine = engine();
        let matches = engine.extractor().extract("£5");
        assert_eq!(engine.rewrite_text("£5", &matches, None), None);
    }

    #[test]
    fn test_leaf_is_wrapped() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.add_element(root, "div");
        doc.add_text(div, "Paid £5 ");
        let b = doc.add_element(div, "b");
        doc.add_text(b, "now");

        let mut markers = MarkerSet::new();
        let outcome = engine()
            .apply_to_region(&mut doc, &mut markers, root, Some(&rate(dec!(1.17))))
            .unwrap();

        assert_eq!(outcome.amounts_converted, 1);
        assert_eq!(outcome.nodes_rewritten, 1);
        assert_eq!(
            doc.to_html(root),
            "<body><div><span data-recast-converted=\"true\">Paid €5.85 </span><b>now</b></div></body>"
        );
        let wrapper = doc.children(div)[0];
        assert_eq!(
            markers.get(wrapper),
            Some(&Mark::Wrapper { original: "Paid £5 ".into() })
        );
        assert_eq!(markers.get(root), Some(&Mark::Scanned));
    }

    #[test]
    fn test_flat_container_rewritten_whole() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.add_element(root, "p");
        doc.add_text(p, "£");
        doc.add_element(p, "i");
        doc.add_text(p, "1,234.56");

        let mut markers = MarkerSet::new();
        let outcome = engine()
            .apply_to_region(&mut doc, &mut markers, root, Some(&rate(dec!(1.17))))
            .unwrap();

        assert_eq!(outcome.nodes_rewritten, 1);
        assert_eq!(doc.to_html(p), "<p>€1,444.44</p>");
        assert_eq!(
            markers.get(p),
            Some(&Mark::Container { original: "£1,234.56".into() })
        );
    }

    #[test]
    fn test_second_pass_is_noop() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.add_element(root, "div");
        doc.add_text(div, "Paid £5 ");
        let b = doc.add_element(div, "b");
        doc.add_text(b, "£7");

        let engine = engine();
        let rate = rate(dec!(1.17));
        let mut markers = MarkerSet::new();
        engine.apply_to_region(&mut doc, &mut markers, root, Some(&rate)).unwrap();
        let html = doc.to_html(root);

        let again = engine.apply_to_region(&mut doc, &mut markers, div, Some(&rate)).unwrap();
        assert!(again.skipped);

        markers.invalidate_scans(&doc, div);
        let rescan = engine.apply_to_region(&mut doc, &mut markers, root, Some(&rate)).unwrap();
        assert!(!rescan.skipped);
        assert_eq!(rescan.amounts_converted, 0);
        assert_eq!(doc.to_html(root), html);
    }

    #[test]
    fn test_hidden_containers_untouched() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.add_element(root, "div");
        let script = doc.add_element(div, "script");
        doc.add_text(script, "var p = '£5';");
        let code = doc.add_element(div, "code");
        doc.add_text(code, "£6");
        let before = doc.to_html(root);

        let mut markers = MarkerSet::new();
        let engine = engine();
        let rate = rate(dec!(1.17));
        let outcome = engine.apply_to_region(&mut doc, &mut markers, root, Some(&rate)).unwrap();
        assert_eq!(outcome.amounts_converted, 0);
        assert_eq!(doc.to_html(root), before);

        let inside = engine.apply_to_region(&mut doc, &mut MarkerSet::new(), code, Some(&rate)).unwrap();
        assert_eq!(inside.amounts_converted, 0);
    }

    #[test]
    fn test_unconvertible_container_marked_scanned() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.add_element(root, "p");
        doc.add_text(p, "Prices in £");

        let mut markers = MarkerSet::new();
        engine()
            .apply_to_region(&mut doc, &mut markers, root, Some(&rate(dec!(1.17))))
            .unwrap();

        assert_eq!(markers.get(p), Some(&Mark::Scanned));
        assert_eq!(doc.text_content(p), "Prices in £");
    }

    #[test]
    fn test_no_rate_leaves_region_unmarked() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.add_text(root, "£5");

        let mut markers = MarkerSet::new();
        let outcome = engine().apply_to_region(&mut doc, &mut markers, root, None).unwrap();

        assert!(outcome.skipped);
        assert!(markers.is_empty());
    }

    #[test]
    fn test_hidden_region_root_untouched() {
        let mut doc = Document::new();
        let root = doc.root();
        let style = doc.add_element(root, "style");
        doc.add_text(style, ".price::after { content: '£5'; }");
        let before = doc.to_html(root);

        let engine = RewriteEngine::new(
            AmountExtractor::new(&Currency::gbp().markers()).unwrap(),
            Converter::new(CurrencyPair::default()),
            vec!["style".into()],
        );
        let mut markers = MarkerSet::new();
        let outcome = engine
            .apply_to_region(&mut doc, &mut markers, style, Some(&rate(dec!(1.17))))
            .unwrap();

        assert_eq!(outcome.amounts_converted, 0);
        assert_eq!(outcome.nodes_rewritten, 0);
        assert_eq!(doc.to_html(root), before);
    }

    #[test]
    fn test_wrapped_region_root_skipped() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.add_element(root, "div");
        doc.add_text(div, "Paid £5 ");
        let b = doc.add_element(div, "b");
        doc.add_text(b, "now");

        let engine = engine();
        let rate = rate(dec!(1.17));
        let mut markers = MarkerSet::new();
        engine.apply_to_region(&mut doc, &mut markers, root, Some(&rate)).unwrap();
        let wrapper = doc.children(div)[0];
        let html = doc.to_html(root);

        let again = engine.apply_to_region(&mut doc, &mut markers, wrapper, Some(&rate)).unwrap();
        assert!(again.skipped);
        assert_eq!(doc.to_html(root), html);
        assert!(markers.get(wrapper).map_or(false, Mark::is_rewrite));
    }

    /// Left-to-right reference: apply replacements in order, shifting later offsets.
    fn rewrite_left_to_right(text: &str, matches: &[AmountMatch], rate: &ConversionRate) -> String {
        let converter = Converter::new(CurrencyPair::default());
        let mut out = text.to_string();
        let mut shift: isize = 0;
        for m in matches {
            let formatted = converter.convert_display(m.value, Some(rate)).unwrap();
            let start = (m.start as isize + shift) as usize;
            out.replace_range(start..start + m.len, &formatted);
            shift += formatted.len() as isize - m.len as isize;
        }
        out
    }

    proptest! {
        #[test]
        fn prop_right_to_left_matches_left_to_right(
            segments in proptest::collection::vec(("[a-z ]{0,6}", 1usize..6, 0u32..100_000), 1..6),
        ) {
            let mut text = String::new();
            let mut matches = Vec::new();
            for (filler, len, cents) in &segments {
                text.push_str(filler);
                let start = text.len();
                let raw: String = "x".repeat(*len);
                text.push_str(&raw);
                matches.push(AmountMatch {
                    raw_text: raw,
                    value: Decimal::new(*cents as i64, 2),
                    start,
                    len: *len,
                });
            }

            let rate = rate(dec!(1.17));
            let expected = rewrite_left_to_right(&text, &matches, &rate);
            let actual = engine().rewrite_text(&text, &matches, Some(&rate)).unwrap();
            prop_assert_eq!(actual, expected);
        }
    }
}
