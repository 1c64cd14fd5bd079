use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use log::{info, warn};

use crate::base::behavior::ModuleBehaviors;
use crate::base::port::{link, Latch};
use crate::burst::{Addr, Alignment, IdSource, PeId};
use crate::dram::{QueueTimingModel, ResolvedStandard};
use crate::error::{Result, SimError};
use crate::pe::{PeClient, PeClientConfig, PeRange};
use crate::sched::BurstScheduler;
use crate::sim::config::{FrontendMode, RunConfig};
use crate::sim::flat_mem::BackingStore;
use crate::sim::summary::RunSummary;
use crate::sim::workload::Workload;
use crate::stream::{ReadStream, StreamPort, VectorPe, WriteStream};
use crate::timeq::{Cycle, Time};

/// Word-level PE with its three stream adapters.
pub struct StreamPe {
    pe: VectorPe,
    a: ReadStream<f32>,
    b: ReadStream<f32>,
    p: WriteStream<f32>,
}

impl StreamPe {
    fn build(
        id: PeId,
        range: PeRange,
        config: &RunConfig,
        alignment: Alignment,
        ids: &IdSource,
        sched: &mut BurstScheduler<QueueTimingModel>,
        latches: &mut Vec<Box<dyn Latch>>,
    ) -> Result<Self> {
        let [pa, pb, pp] = PeClient::port_ids(id);
        let port = |port_id| StreamPort {
            pe_id: id,
            port_id,
            alignment,
            ids: ids.clone(),
        };
        let mut pe = VectorPe::new(
            id,
            range,
            config.workload.kernel,
            config.pe.buffer_depth,
            config.pe.burst_bytes,
        )?;
        let mut a = ReadStream::new(port(pa));
        let mut b = ReadStream::new(port(pb));
        let mut p = WriteStream::new(port(pp));

        latches.extend(sched.connect(&mut a.link, &[pa])?);
        latches.extend(sched.connect(&mut b.link, &[pb])?);
        latches.extend(sched.connect(&mut p.link, &[pp])?);
        for (operand, stream) in pe.operands.iter_mut().zip([&mut a, &mut b]) {
            latches.push(Box::new(link(&mut stream.cmd, &mut operand.cmd)));
            latches.push(Box::new(link(&mut operand.din, &mut stream.dout)));
        }
        latches.push(Box::new(link(&mut p.cmd, &mut pe.write_cmd)));
        latches.push(Box::new(link(&mut p.din, &mut pe.dout)));
        latches.push(Box::new(link(&mut pe.write_done, &mut p.complete)));
        Ok(Self { pe, a, b, p })
    }

    fn tick_one(&mut self, now: Time) -> Result<()> {
        self.pe.tick_one(now)?;
        self.a.tick_one(now)?;
        self.b.tick_one(now)?;
        self.p.tick_one(now)
    }
}

pub enum Frontend {
    Burst(Vec<PeClient>),
    Stream(Vec<StreamPe>),
}

impl Frontend {
    fn tick_one(&mut self, now: Time) -> Result<()> {
        match self {
            Frontend::Burst(pes) => pes.iter_mut().try_for_each(|pe| pe.tick_one(now)),
            Frontend::Stream(pes) => pes.iter_mut().try_for_each(|pe| pe.tick_one(now)),
        }
    }

    fn finished(&self) -> bool {
        match self {
            Frontend::Burst(pes) => pes.iter().all(PeClient::finished),
            Frontend::Stream(pes) => pes.iter().all(|s| s.pe.finished()),
        }
    }

    fn summarize(&self, summary: &mut RunSummary) {
        match self {
            Frontend::Burst(pes) => pes.iter().for_each(|pe| pe.summarize(summary)),
            Frontend::Stream(pes) => pes.iter().for_each(|s| s.pe.summarize(summary)),
        }
    }
}

/// Top level of a run: the workload in a backing store, one scheduler in front of the timing
/// model, and the PEs of the selected frontend, stepped on two clocks.
pub struct Sim {
    config: RunConfig,
    standard: ResolvedStandard,
    workload: Workload,
    sched: BurstScheduler<QueueTimingModel>,
    frontend: Frontend,
    latches: Vec<Box<dyn Latch>>,
    now: Time,
    pe_cycles: Cycle,
    mem_cycles: Cycle,
}

impl Sim {
    pub fn new(config: RunConfig) -> Result<Self> {
        let standard = config.validate()?;
        let alignment = standard.alignment;
        let workload = Workload::generate(&config.workload);
        let mut store = BackingStore::new(workload.layout.store_bytes(alignment.width()));
        workload.install(&mut store)?;

        let ids = IdSource::new();
        let model = QueueTimingModel::new(&standard, config.mem.model())?;
        let mut sched = BurstScheduler::new(config.scheduler(), alignment, ids.clone(), model, store);
        let mut latches: Vec<Box<dyn Latch>> = Vec::new();
        let ranges = workload.layout.split(config.pe.num_pes);

        let frontend = match config.sim.frontend_mode {
            FrontendMode::Burst => {
                let pe_config = PeClientConfig {
                    buffer_depth: config.pe.buffer_depth,
                    burst_bytes: config.pe.burst_bytes,
                    kernel: config.workload.kernel,
                };
                let mut pes = Vec::with_capacity(ranges.len());
                for (id, range) in ranges.into_iter().enumerate() {
                    let mut pe = PeClient::new(id, range, pe_config, alignment, ids.clone())?;
                    latches.extend(sched.connect(&mut pe.link, &PeClient::port_ids(id))?);
                    pes.push(pe);
                }
                Frontend::Burst(pes)
            }
            FrontendMode::Stream => {
                let mut pes = Vec::with_capacity(ranges.len());
                for (id, range) in ranges.into_iter().enumerate() {
                    pes.push(StreamPe::build(
                        id,
                        range,
                        &config,
                        alignment,
                        &ids,
                        &mut sched,
                        &mut latches,
                    )?);
                }
                Frontend::Stream(pes)
            }
        };

        Ok(Self {
            config,
            standard,
            workload,
            sched,
            frontend,
            latches,
            now: 0,
            pe_cycles: 0,
            mem_cycles: 0,
        })
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn scheduler(&self) -> &BurstScheduler<QueueTimingModel> {
        &self.sched
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    fn pe_tick(&mut self, now: Time) -> Result<()> {
        self.sched.pe_tick(now)?;
        self.frontend.tick_one(now)?;
        self.latches.iter().for_each(|l| l.latch());
        self.pe_cycles += 1;
        Ok(())
    }

    /// Step both clocks until every PE is done. Memory edges fall at multiples of the memory
    /// period and PE edges at multiples of the PE period; on a shared edge memory goes first.
    pub fn run(&mut self) -> Result<()> {
        let pe_period = self.config.sim.pe_clock_ns;
        let mem_period = self.config.sim.mem_clock_ns;
        let timeout = self.config.sim.timeout_ns;
        let mut next_pe = pe_period;
        let mut next_mem = mem_period;
        info!(
            "running {} PE(s) on {} ({}B bursts), PE clock {}ns, memory clock {}ns",
            self.config.pe.num_pes,
            self.standard.name,
            self.standard.alignment.width(),
            pe_period,
            mem_period
        );

        while !self.frontend.finished() {
            let now = next_pe.min(next_mem);
            if now > timeout {
                return Err(SimError::Timeout(timeout));
            }
            self.now = now;
            if next_mem == now {
                self.sched.mem_tick(now)?;
                self.mem_cycles += 1;
                next_mem += mem_period;
            }
            if next_pe == now {
                self.pe_tick(now)?;
                next_pe += pe_period;
            }
        }
        info!("@{}ns all PEs done", self.now);
        if self.sched.arena().live() > 0 {
            warn!(
                "{} burst(s) still owned by the scheduler after the last PE finished",
                self.sched.arena().live()
            );
        }
        Ok(())
    }

    pub fn summary(&self) -> Result<RunSummary> {
        let mut summary = RunSummary {
            standard: self.standard.name.clone(),
            frontend: self.config.sim.frontend_mode,
            sim_time_ns: self.now,
            pe_cycles: self.pe_cycles,
            mem_cycles: self.mem_cycles,
            memory: self.sched.model().stats(),
            ..RunSummary::default()
        };
        self.sched.summarize(&mut summary);
        self.frontend.summarize(&mut summary);
        let result = self.workload.result(self.sched.store())?;
        summary.mismatches = self.workload.mismatches(&result);
        Ok(summary)
    }

    fn dump(&self, path: &Path, addr: Addr) -> anyhow::Result<()> {
        let file =
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        self.sched.store().dump_words::<f32, _>(
            addr,
            self.workload.layout.vec_len,
            &mut BufWriter::new(file),
        )
    }

    /// Run to completion, then dump and check the result and report the summary.
    pub fn simulate(&mut self) -> anyhow::Result<RunSummary> {
        self.run()?;
        if let Some(path) = &self.config.sim.result_dump {
            self.dump(path, self.workload.layout.p)?;
        }
        if let Some(path) = &self.config.sim.gold_dump {
            self.dump(path, self.workload.layout.gold)?;
        }
        let summary = self.summary()?;
        summary.log();
        if summary.mismatches > 0 {
            warn!(
                "{} of {} result elements differ from the golden result",
                summary.mismatches, self.workload.layout.vec_len
            );
        } else {
            info!("result matches the golden result");
        }
        if let Some(path) = &self.config.sim.summary_json {
            summary.write_json(path)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::Retention;
    use crate::sim::workload::Kernel;

    fn config(frontend: FrontendMode) -> RunConfig {
        let mut config = RunConfig::default();
        config.sim.frontend_mode = frontend;
        config.sim.pe_clock_ns = 3;
        config.sim.mem_clock_ns = 2;
        config.sim.timeout_ns = 1_000_000;
        config.mem.standard = "DDR4".to_string();
        config.mem.channels = 2;
        config.mem.queue_capacity = 2;
        config.mem.jitter = 6;
        config.mem.seed = 11;
        config.pe.num_pes = 2;
        config.pe.buffer_depth = 24;
        config.pe.burst_bytes = 40;
        config.workload.vec_len = 150;
        config.workload.seed = 3;
        config
    }

    fn check_clean_run(config: RunConfig) -> RunSummary {
        let mut sim = Sim::new(config).unwrap();
        let summary = sim.simulate().unwrap();
        assert_eq!(0, summary.mismatches);
        let s = summary.scheduler;
        assert_eq!(s.bursts_submitted, s.bursts_released);
        assert_eq!(s.requests_queued, s.requests_completed);
        assert_eq!(s.requests_accepted, s.requests_completed);
        assert_eq!(2, summary.pes.len());
        assert_eq!(150, summary.pes.iter().map(|p| p.elements).sum::<usize>());
        assert_eq!(0, sim.scheduler().arena().live());
        summary
    }

    #[test]
    fn burst_frontend_matches_gold() {
        let summary = check_clean_run(config(FrontendMode::Burst));
        // three ports per PE share one link each
        assert_eq!(6, summary.ports.len());
        assert!(summary.ports.iter().all(|p| p.bursts > 0 && p.mean_latency_ns > 0.0));
        assert!(summary.mem_cycles > summary.pe_cycles);
    }

    #[test]
    fn stream_frontend_matches_gold() {
        let mut config = config(FrontendMode::Stream);
        config.workload.kernel = Kernel::Mul;
        let summary = check_clean_run(config);
        assert_eq!(6, summary.ports.len());
    }

    #[test]
    fn per_port_ordering_and_keep_all() {
        let mut config = config(FrontendMode::Burst);
        config.sim.per_port_ordering = true;
        config.sim.retention = Retention::KeepAll;
        let mut sim = Sim::new(config).unwrap();
        sim.run().unwrap();
        let arena = sim.scheduler().arena();
        assert_eq!(arena.delivered() as usize, arena.len());
        assert_eq!(0, arena.live());
        assert_eq!(0, sim.summary().unwrap().mismatches);
    }

    #[test]
    fn refusals_do_not_lose_requests() {
        let mut config = config(FrontendMode::Burst);
        config.mem.channels = 1;
        config.mem.queue_capacity = 1;
        config.mem.read_latency = 30;
        let summary = check_clean_run(config);
        assert!(summary.scheduler.refusals > 0);
        assert_eq!(summary.scheduler.refusals, summary.memory.refused);
    }

    #[test]
    fn run_past_timeout_fails() {
        let mut config = config(FrontendMode::Burst);
        config.sim.timeout_ns = 50;
        let mut sim = Sim::new(config).unwrap();
        assert!(matches!(sim.run(), Err(SimError::Timeout(50))));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = config(FrontendMode::Stream);
        config.mem.standard = "DDR2".to_string();
        assert!(matches!(Sim::new(config), Err(SimError::Config(_))));
    }

    #[test]
    fn dumps_one_word_per_line() {
        let dir = std::env::temp_dir().join(format!("burstsim-dump-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = config(FrontendMode::Burst);
        config.workload.vec_len = 20;
        config.sim.result_dump = Some(dir.join("result.txt"));
        config.sim.gold_dump = Some(dir.join("gold.txt"));
        config.sim.summary_json = Some(dir.join("summary.json"));
        let mut sim = Sim::new(config).unwrap();
        sim.simulate().unwrap();

        let result = std::fs::read_to_string(dir.join("result.txt")).unwrap();
        let gold = std::fs::read_to_string(dir.join("gold.txt")).unwrap();
        assert_eq!(20, result.lines().count());
        assert_eq!(gold, result);
        let parsed: Vec<f32> = result.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(sim.workload().gold, parsed);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("summary.json")).unwrap())
                .unwrap();
        assert_eq!("DDR4", json["standard"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
