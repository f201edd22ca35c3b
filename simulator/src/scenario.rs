//! Simulation scenarios.

use std::path::Path;

use anyhow::Context;
use recast_tree::Fragment;
use serde::{Deserialize, Serialize};

/// A simulation scenario: an initial document and the host edits applied to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Page key reported at activation.
    #[serde(default = "default_key")]
    pub initial_key: String,
    /// Children of the document root.
    pub initial: Vec<Fragment>,
    pub steps: Vec<ScenarioStep>,
}

fn default_key() -> String {
    "/".to_string()
}

/// A host edit or pause. Elements are addressed by their `id` attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { ms: u64 },
    /// Build a subtree under `parent` (the root when absent).
    Append {
        #[serde(default)]
        parent: Option<String>,
        fragment: Fragment,
    },
    /// Replace the children of an element with one text node.
    SetText { id: String, text: String },
    /// Remove an element and its subtree.
    Remove { id: String },
    /// Report a new page key.
    Navigate { key: String },
    /// Append `count` random line items in one burst.
    Churn {
        #[serde(default)]
        parent: Option<String>,
        count: usize,
    },
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "dashboard" => Ok(Self::dashboard()),
            "churn" => Ok(Self::churn()),
            path => Self::from_file(path),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Unknown scenario or unreadable file: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid scenario file: {}", path.display()))
    }

    /// Earnings dashboard with a late-loading card and a page change.
    fn dashboard() -> Self {
        Self {
            name: "dashboard".to_string(),
            description: "Earnings card, lazy row and navigation".to_string(),
            initial_key: "/home".to_string(),
            initial: vec![
                Fragment::element_with(
                    "div",
                    &[("id", "earnings")],
                    vec![
                        Fragment::element(
                            "div",
                            vec![
                                Fragment::element("span", vec![Fragment::text("This month so far")]),
                                Fragment::element("span", vec![Fragment::text("£25.40")]),
                            ],
                        ),
                        Fragment::element(
                            "div",
                            vec![
                                Fragment::element("span", vec![Fragment::text("Last month")]),
                                Fragment::element("span", vec![Fragment::text("£21.37")]),
                            ],
                        ),
                    ],
                ),
                Fragment::element_with("ul", &[("id", "payments")], vec![]),
            ],
            steps: vec![
                ScenarioStep::Wait { ms: 1_600 },
                ScenarioStep::Append {
                    parent: Some("payments".to_string()),
                    fragment: Fragment::element("li", vec![Fragment::text("Payment issued £1,234.56")]),
                },
                ScenarioStep::Wait { ms: 100 },
                ScenarioStep::Append {
                    parent: Some("payments".to_string()),
                    fragment: Fragment::element("li", vec![Fragment::text("Pending GBP 98.10")]),
                },
                ScenarioStep::Wait { ms: 1_000 },
                ScenarioStep::Navigate {
                    key: "/reports".to_string(),
                },
                ScenarioStep::Wait { ms: 1_600 },
            ],
        }
    }

    /// Bursts of line items under one list.
    fn churn() -> Self {
        Self {
            name: "churn".to_string(),
            description: "Repeated bursts of new amounts".to_string(),
            initial_key: default_key(),
            initial: vec![Fragment::element_with("ol", &[("id", "items")], vec![])],
            steps: vec![
                ScenarioStep::Wait { ms: 1_200 },
                ScenarioStep::Churn {
                    parent: Some("items".to_string()),
                    count: 50,
                },
                ScenarioStep::Wait { ms: 100 },
                ScenarioStep::Churn {
                    parent: Some("items".to_string()),
                    count: 50,
                },
                ScenarioStep::Wait { ms: 600 },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_builtin() {
        let scenario = Scenario::load("dashboard").unwrap();
        assert_eq!(scenario.initial_key, "/home");
        assert_eq!(scenario.initial.len(), 2);
        assert!(Scenario::load("churn").is_ok());
    }

    #[test]
    fn test_load_file() {
        let json = r#"{
            "name": "file",
            "initial": [{"tag": "p", "attrs": {"id": "total"}, "children": ["£5"]}],
            "steps": [
                {"wait": {"ms": 1200}},
                {"set_text": {"id": "total", "text": "£6"}},
                {"append": {"fragment": {"tag": "p", "children": ["£7"]}}},
                {"churn": {"count": 3}}
            ]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let scenario = Scenario::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(scenario.initial_key, "/");
        assert_eq!(scenario.steps.len(), 4);
        assert!(matches!(scenario.steps[0], ScenarioStep::Wait { ms: 1200 }));
        assert!(matches!(&scenario.steps[2], ScenarioStep::Append { parent: None, .. }));
    }

    #[test]
    fn test_unknown_scenario() {
        assert!(Scenario::load("/nonexistent/scenario.json").is_err());
    }
}
