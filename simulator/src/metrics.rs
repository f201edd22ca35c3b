//! Simulation report.

use std::time::Duration;

use recast_engine::MetricsSnapshot;
use serde::Serialize;

/// What a scenario run did to the document and what the engine did back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub steps_run: u64,
    /// Host edits applied to the document.
    pub host_edits: u64,
    pub navigations: u64,
    pub elapsed_ms: u64,
    pub engine: MetricsSnapshot,
}

impl SimulationReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            ..Self::default()
        }
    }

    pub fn record_step(&mut self) {
        self.steps_run += 1;
    }

    pub fn record_edits(&mut self, count: u64) {
        self.host_edits += count;
    }

    pub fn record_navigation(&mut self) {
        self.navigations += 1;
    }

    pub fn finish(&mut self, elapsed: Duration, engine: MetricsSnapshot) {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self.engine = engine;
    }

    /// Amounts converted per host edit; zero when nothing was edited.
    pub fn conversions_per_edit(&self) -> f64 {
        if self.host_edits == 0 {
            return 0.0;
        }
        self.engine.amounts_converted as f64 / self.host_edits as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_per_edit() {
        let mut report = SimulationReport::new("t");
        assert_eq!(report.conversions_per_edit(), 0.0);

        report.record_edits(4);
        report.finish(
            Duration::from_millis(10),
            MetricsSnapshot {
                amounts_converted: 8,
                ..MetricsSnapshot::default()
            },
        );

        assert_eq!(report.conversions_per_edit(), 2.0);
        assert_eq!(report.elapsed_ms, 10);
    }
}
