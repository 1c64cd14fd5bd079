use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::burst::Word;
use crate::dram::standard::{resolve, ResolvedStandard};
use crate::dram::QueueModelConfig;
use crate::error::{Result, SimError};
use crate::sched::{Retention, SchedulerConfig};
use crate::sim::workload::Kernel;
use crate::timeq::{Cycle, Time};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrontendMode {
    /// PE clients issuing whole bursts over one arbitrated link each.
    #[default]
    Burst,
    /// Word-level vector PEs behind read/write stream adapters.
    Stream,
}

impl FromStr for FrontendMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "burst" => Ok(Self::Burst),
            "stream" => Ok(Self::Stream),
            _ => Err(format!(
                "unsupported frontend mode '{}', expected one of: burst, stream",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub pe_clock_ns: Time,
    pub mem_clock_ns: Time,
    pub timeout_ns: Time,
    pub frontend_mode: FrontendMode,
    pub per_port_ordering: bool,
    pub retention: Retention,
    pub result_dump: Option<PathBuf>,
    pub gold_dump: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .with_context(|| format!("cannot deserialize {}", std::any::type_name::<Self>())),
            None => {
                warn!(
                    "config section for {} not found, using defaults",
                    std::any::type_name::<Self>()
                );
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            pe_clock_ns: 2,
            mem_clock_ns: 1,
            timeout_ns: 10_000_000,
            frontend_mode: FrontendMode::Burst,
            per_port_ordering: false,
            retention: Retention::EvictDelivered,
            result_dump: None,
            gold_dump: None,
            summary_json: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemConfig {
    pub standard: String,
    // 0 keeps the standard's default
    pub channels: usize,
    pub ranks: usize,
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    pub bytes_per_cycle: u32,
    pub queue_capacity: usize,
    pub jitter: Cycle,
    pub seed: u64,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        let model = QueueModelConfig::default();
        Self {
            standard: String::new(),
            channels: 0,
            ranks: 0,
            read_latency: model.read_latency,
            write_latency: model.write_latency,
            bytes_per_cycle: model.bytes_per_cycle,
            queue_capacity: model.queue_capacity,
            jitter: model.jitter,
            seed: model.seed,
        }
    }
}

impl MemConfig {
    pub fn model(&self) -> QueueModelConfig {
        QueueModelConfig {
            read_latency: self.read_latency,
            write_latency: self.write_latency,
            bytes_per_cycle: self.bytes_per_cycle,
            queue_capacity: self.queue_capacity,
            jitter: self.jitter,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PeConfig {
    pub num_pes: usize,
    /// Words per local buffer.
    pub buffer_depth: usize,
    /// Bytes per issued burst.
    pub burst_bytes: usize,
}

impl Config for PeConfig {}

impl Default for PeConfig {
    fn default() -> Self {
        Self {
            num_pes: 1,
            buffer_depth: 64,
            burst_bytes: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct WorkloadConfig {
    pub kernel: Kernel,
    pub vec_len: usize,
    pub seed: u64,
}

impl Config for WorkloadConfig {}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            kernel: Kernel::Add,
            vec_len: 1024,
            seed: 0,
        }
    }
}

/// Every section of a run's configuration.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub sim: SimConfig,
    pub mem: MemConfig,
    pub pe: PeConfig,
    pub workload: WorkloadConfig,
}

impl RunConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let table: Table = toml::from_str(text).context("cannot parse config toml")?;
        Ok(Self {
            sim: SimConfig::from_section(table.get("sim"))?,
            mem: MemConfig::from_section(table.get("mem"))?,
            pe: PeConfig::from_section(table.get("pe"))?,
            workload: WorkloadConfig::from_section(table.get("workload"))?,
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            mem_clock_ns: self.sim.mem_clock_ns,
            per_port_ordering: self.sim.per_port_ordering,
            retention: self.sim.retention,
        }
    }

    /// Check the whole configuration and resolve the memory standard.
    pub fn validate(&self) -> Result<ResolvedStandard> {
        let standard = resolve(&self.mem.standard, self.mem.channels, self.mem.ranks)?;
        if self.sim.pe_clock_ns == 0 || self.sim.mem_clock_ns == 0 {
            return Err(SimError::config("clock periods must be non-zero"));
        }
        if self.pe.num_pes == 0 {
            return Err(SimError::config("at least one PE is required"));
        }
        if self.pe.buffer_depth == 0 {
            return Err(SimError::config("PE buffer depth must be non-zero"));
        }
        let word = <f32 as Word>::BYTES;
        if self.pe.burst_bytes == 0 || self.pe.burst_bytes % word != 0 {
            return Err(SimError::config(format!(
                "burst_bytes {} is not a non-zero multiple of the {}-byte word",
                self.pe.burst_bytes, word
            )));
        }
        if self.pe.buffer_depth * word < self.pe.burst_bytes {
            return Err(SimError::config(format!(
                "buffer of {} words cannot hold a {}-byte burst",
                self.pe.buffer_depth, self.pe.burst_bytes
            )));
        }
        Ok(standard)
    }
}
