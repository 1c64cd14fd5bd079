use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::burst::{Alignment, BasicRequest};
use crate::dram::{Completion, ResolvedStandard, TimingModel};
use crate::error::{Result, SimError};
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, TimedServer};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QueueModelConfig {
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    pub bytes_per_cycle: u32,
    // per (channel, rank) server
    pub queue_capacity: usize,
    // upper bound of the uniformly drawn extra latency; 0 keeps service in order per server
    pub jitter: Cycle,
    pub seed: u64,
}

impl Default for QueueModelConfig {
    fn default() -> Self {
        Self {
            read_latency: 20,
            write_latency: 20,
            bytes_per_cycle: 16,
            queue_capacity: 32,
            jitter: 0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueModelStats {
    pub accepted: u64,
    pub refused: u64,
    pub reads_completed: u64,
    pub writes_retired: u64,
}

/// Stand-in for a DRAM timing model: one bounded [`TimedServer`] per (channel, rank), with requests
/// interleaved across servers at burst granularity.
pub struct QueueTimingModel {
    alignment: Alignment,
    channels: usize,
    ranks: usize,
    config: QueueModelConfig,
    servers: Vec<TimedServer<BasicRequest>>,
    rng: StdRng,
    cycle: Cycle,
    stats: QueueModelStats,
}

impl QueueTimingModel {
    pub fn new(standard: &ResolvedStandard, config: QueueModelConfig) -> Result<Self> {
        if config.bytes_per_cycle == 0 || config.queue_capacity == 0 {
            return Err(SimError::config(
                "memory bytes_per_cycle and queue_capacity must be non-zero",
            ));
        }
        let server_config = ServerConfig {
            base_latency: 0,
            bytes_per_cycle: config.bytes_per_cycle,
            queue_capacity: config.queue_capacity,
        };
        let servers = (0..standard.channels * standard.ranks)
            .map(|_| TimedServer::new(server_config))
            .collect();
        Ok(Self {
            alignment: standard.alignment,
            channels: standard.channels,
            ranks: standard.ranks,
            config,
            servers,
            rng: StdRng::seed_from_u64(config.seed),
            cycle: 0,
            stats: QueueModelStats::default(),
        })
    }

    /// Server index for `addr`: consecutive bursts go to consecutive channels, then ranks.
    fn server_index(&self, addr: u64) -> usize {
        let burst = addr / self.alignment.width();
        let channel = (burst % self.channels as u64) as usize;
        let rank = ((burst / self.channels as u64) % self.ranks as u64) as usize;
        channel * self.ranks + rank
    }

    fn latency_for(&mut self, request: &BasicRequest) -> Cycle {
        let base = if request.op.is_write() {
            self.config.write_latency
        } else {
            self.config.read_latency
        };
        if self.config.jitter == 0 {
            base
        } else {
            base + self.rng.gen_range(0..=self.config.jitter)
        }
    }

    pub fn stats(&self) -> QueueModelStats {
        self.stats
    }
}

impl TimingModel for QueueTimingModel {
    fn try_send(&mut self, request: BasicRequest) -> std::result::Result<(), BasicRequest> {
        let idx = self.server_index(request.addr);
        if self.servers[idx].is_full() {
            self.stats.refused += 1;
            return Err(request);
        }
        let extra = self.latency_for(&request);
        let size = self.alignment.width() as u32;
        let req = ServiceRequest::new(request, size).with_extra_latency(extra);
        match self.servers[idx].try_enqueue(self.cycle, req) {
            Ok(ticket) => {
                debug!(
                    "mem cycle {}: server {} accepted request, ready at {}",
                    self.cycle,
                    idx,
                    ticket.ready_at()
                );
                self.stats.accepted += 1;
                Ok(())
            }
            Err(bp) => {
                self.stats.refused += 1;
                Err(bp.into_request().payload)
            }
        }
    }

    fn tick<F: FnMut(Completion)>(&mut self, mut on_complete: F) {
        self.cycle += 1;
        let now = self.cycle;
        let mut reads = 0;
        let mut writes = 0;
        for server in self.servers.iter_mut() {
            server.service_ready(now, |result| {
                // writes are done on acceptance as far as the scheduler is concerned
                if result.payload.op.is_write() {
                    writes += 1;
                    return;
                }
                reads += 1;
                on_complete(Completion {
                    request: result.payload,
                    arrive: result.ticket.issued_at(),
                    depart: result.ticket.ready_at(),
                });
            });
        }
        self.stats.reads_completed += reads;
        self.stats.writes_retired += writes;
    }

    fn outstanding(&self) -> usize {
        self.servers.iter().map(TimedServer::outstanding).sum()
    }

    fn cycle(&self) -> Cycle {
        self.cycle
    }
}
