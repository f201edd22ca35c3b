//! Simulation controller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recast_common::NodeId;
use recast_engine::{Engine, PipelineHandle, SharedMetrics, SharedTree};
use recast_tree::{Document, Fragment, HostTree};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::SimulationReport;
use crate::scenario::{Scenario, ScenarioStep};

/// Plays a scenario against a simulated document while a pipeline keeps it converted.
pub struct SimulationController {
    tree: SharedTree<Document>,
    handle: PipelineHandle,
    metrics: SharedMetrics,
    rng: StdRng,
    report: SimulationReport,
    started: Instant,
}

impl SimulationController {
    /// Build the scenario's initial document and spawn the pipeline over it.
    pub fn start(scenario: &Scenario, engine: Engine, seed: Option<u64>) -> anyhow::Result<Self> {
        let document = Document::from_fragments(&scenario.initial).context("Invalid initial document")?;
        info!(nodes = document.len(), "Built initial document");

        let tree = Arc::new(Mutex::new(document));
        let metrics = engine.metrics().clone();
        let handle = PipelineHandle::spawn(engine, tree.clone(), scenario.initial_key.clone());
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            tree,
            handle,
            metrics,
            rng,
            report: SimulationReport::new(&scenario.name),
            started: Instant::now(),
        })
    }

    /// Run every step in order.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(scenario = %scenario.name, steps = scenario.steps.len(), "Running scenario");

        for (index, step) in scenario.steps.iter().enumerate() {
            self.apply(step)
                .await
                .with_context(|| format!("Step {} failed", index + 1))?;
            self.report.record_step();
        }
        Ok(())
    }

    async fn apply(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        debug!(?step, "Applying step");
        match step {
            ScenarioStep::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            ScenarioStep::Append { parent, fragment } => {
                let mut tree = self.tree.lock();
                let parent = resolve(&tree, parent.as_deref())?;
                tree.build(parent, fragment)?;
                self.report.record_edits(1);
            }
            ScenarioStep::SetText { id, text } => {
                let mut tree = self.tree.lock();
                let node = resolve(&tree, Some(id))?;
                tree.set_element_text(node, text)?;
                self.report.record_edits(1);
            }
            ScenarioStep::Remove { id } => {
                let mut tree = self.tree.lock();
                let node = resolve(&tree, Some(id))?;
                tree.remove_node(node)?;
                self.report.record_edits(1);
            }
            ScenarioStep::Navigate { key } => {
                info!(key = %key, "Navigating");
                self.handle.navigate(key.clone());
                self.report.record_navigation();
            }
            ScenarioStep::Churn { parent, count } => {
                let items: Vec<Fragment> = (0..*count).map(|i| self.line_item(i)).collect();
                let mut tree = self.tree.lock();
                let parent = resolve(&tree, parent.as_deref())?;
                for item in &items {
                    tree.build(parent, item)?;
                }
                self.report.record_edits(items.len() as u64);
            }
        }
        Ok(())
    }

    fn line_item(&mut self, index: usize) -> Fragment {
        let pence: i64 = self.rng.gen_range(1..10_000_000);
        let amount = Decimal::new(pence, 2);
        Fragment::element("li", vec![Fragment::text(format!("Item {}: £{}", index + 1, amount))])
    }

    /// Let pending timers fire for `grace`, stop the pipeline and return the report with
    /// the final document markup.
    pub async fn finish(mut self, grace: Duration) -> anyhow::Result<(SimulationReport, String)> {
        let engine = self.handle.shutdown_after(grace).await?;
        self.report.finish(self.started.elapsed(), engine.metrics().snapshot());

        let tree = self.tree.lock();
        let html = tree.to_html(tree.root());
        info!(
            edits = self.report.host_edits,
            converted = self.report.engine.amounts_converted,
            "Simulation complete"
        );
        Ok((self.report, html))
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }
}

fn resolve(tree: &Document, id: Option<&str>) -> anyhow::Result<NodeId> {
    match id {
        None => Ok(tree.root()),
        Some(id) => tree
            .element_by_id(id)
            .ok_or_else(|| anyhow!("Unknown element id: {}", id)),
    }
}
