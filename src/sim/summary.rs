//! End-of-run statistics, printed through `log` and optionally written out as JSON.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use log::info;
use serde::Serialize;

use crate::burst::{PeId, PortId};
use crate::dram::queue_model::QueueModelStats;
use crate::sched::SchedStats;
use crate::sim::config::FrontendMode;
use crate::timeq::{Cycle, Time};

#[derive(Debug, Clone, Serialize)]
pub struct PortSummary {
    pub port: PortId,
    pub bursts: u64,
    /// Mean of arrive_pe - depart_pe over the port's delivered bursts.
    pub mean_latency_ns: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeSummary {
    pub pe: PeId,
    pub elements: usize,
    pub bursts_issued: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub standard: String,
    pub frontend: FrontendMode,
    pub sim_time_ns: Time,
    pub pe_cycles: Cycle,
    pub mem_cycles: Cycle,
    pub scheduler: SchedStats,
    pub memory: QueueModelStats,
    pub ports: Vec<PortSummary>,
    pub pes: Vec<PeSummary>,
    pub mismatches: usize,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "{} frontend on {}: {} ns, {} PE cycles, {} memory cycles",
            match self.frontend {
                FrontendMode::Burst => "burst",
                FrontendMode::Stream => "stream",
            },
            self.standard,
            self.sim_time_ns,
            self.pe_cycles,
            self.mem_cycles
        );
        let s = &self.scheduler;
        info!(
            "bursts submitted {} released {}; requests queued {} accepted {} completed {}; refusals {} replays {}",
            s.bursts_submitted,
            s.bursts_released,
            s.requests_queued,
            s.requests_accepted,
            s.requests_completed,
            s.refusals,
            s.replays
        );
        for port in &self.ports {
            info!(
                "port {}: {} bursts, mean latency {:.1} ns",
                port.port, port.bursts, port.mean_latency_ns
            );
        }
        for pe in &self.pes {
            info!(
                "pe {}: {} elements, {} bursts",
                pe.pe, pe.elements, pe.bursts_issued
            );
        }
        info!("validation mismatches: {}", self.mismatches);
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("cannot create summary file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_nested_stats() {
        let mut summary = RunSummary {
            standard: "DDR4".to_string(),
            sim_time_ns: 120,
            ..RunSummary::default()
        };
        summary.scheduler.replays = 2;
        summary.ports.push(PortSummary {
            port: 3,
            bursts: 4,
            mean_latency_ns: 12.5,
        });
        let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
        assert_eq!("DDR4", json["standard"]);
        assert_eq!("burst", json["frontend"]);
        assert_eq!(2, json["scheduler"]["replays"]);
        assert_eq!(12.5, json["ports"][0]["mean_latency_ns"]);
    }
}
