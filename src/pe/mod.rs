//! Burst-level processing element: streams two operand vectors in over ports A and B, applies the
//! kernel element by element, and streams the result out over port P. All three ports share one
//! link to the scheduler and take turns on it.

use std::collections::VecDeque;

use log::debug;

use crate::arbiter::RoundRobinArbiter;
use crate::base::behavior::ModuleBehaviors;
use crate::burst::{Addr, Alignment, Burst, IdSource, MemOp, PeId, PortId, Word};
use crate::error::{Result, SimError};
use crate::sched::BurstLink;
use crate::sim::summary::{PeSummary, RunSummary};
use crate::sim::workload::Kernel;
use crate::timeq::Time;

pub mod port;

pub use port::{PortKind, PortState};

const WORD_BYTES: usize = <f32 as Word>::BYTES;

#[derive(Debug, Clone, Copy)]
pub struct PeClientConfig {
    /// Capacity of each local buffer, in words.
    pub buffer_depth: usize,
    /// Bytes per issued burst; the last burst of a stream may be shorter.
    pub burst_bytes: usize,
    pub kernel: Kernel,
}

/// Slice of the vectors one PE works on, as absolute addresses of its first element.
#[derive(Debug, Clone, Copy)]
pub struct PeRange {
    pub a: Addr,
    pub b: Addr,
    pub p: Addr,
    pub elements: usize,
}

pub struct PeClient {
    id: PeId,
    config: PeClientConfig,
    alignment: Alignment,
    ids: IdSource,
    pub link: BurstLink,
    ports: [PortState; 3],
    operands: [VecDeque<f32>; 2],
    // words requested on a read port and not yet returned
    reserved: [usize; 2],
    results: VecDeque<f32>,
    arbiter: RoundRobinArbiter,
    computed: usize,
}

impl PeClient {
    pub fn port_ids(pe: PeId) -> [PortId; 3] {
        PortKind::ALL.map(|kind| pe * PortKind::ALL.len() + kind.index())
    }

    pub fn new(
        id: PeId,
        range: PeRange,
        config: PeClientConfig,
        alignment: Alignment,
        ids: IdSource,
    ) -> Result<Self> {
        if config.burst_bytes == 0 || config.burst_bytes % WORD_BYTES != 0 {
            return Err(SimError::config(format!(
                "burst size {} is not a whole number of {}-byte words",
                config.burst_bytes, WORD_BYTES
            )));
        }
        if config.buffer_depth < config.burst_bytes / WORD_BYTES {
            return Err(SimError::config(format!(
                "buffer of {} words cannot hold a {}-byte burst",
                config.buffer_depth, config.burst_bytes
            )));
        }
        let [a, b, p] = Self::port_ids(id);
        Ok(Self {
            id,
            config,
            alignment,
            ids,
            link: BurstLink::new(),
            ports: [
                PortState::new(PortKind::ReadA, a, range.a, range.elements),
                PortState::new(PortKind::ReadB, b, range.b, range.elements),
                PortState::new(PortKind::WriteP, p, range.p, range.elements),
            ],
            operands: [VecDeque::new(), VecDeque::new()],
            reserved: [0; 2],
            results: VecDeque::new(),
            arbiter: RoundRobinArbiter::new(),
            computed: 0,
        })
    }

    pub fn id(&self) -> PeId {
        self.id
    }

    pub fn port(&self, kind: PortKind) -> &PortState {
        &self.ports[kind.index()]
    }

    fn chunk_words(&self) -> usize {
        self.config.burst_bytes / WORD_BYTES
    }

    fn new_burst(&self, op: MemOp, port: PortId, addr: Addr, words: usize) -> Result<Burst> {
        let mut burst = Burst::new(
            op,
            self.ids.next_burst(),
            self.id,
            port,
            addr,
            words * WORD_BYTES,
        );
        burst.decompose(self.alignment, &self.ids)?;
        Ok(burst)
    }

    fn accept_response(&mut self, burst: Burst) -> Result<()> {
        let idx = self
            .ports
            .iter()
            .position(|p| p.id == burst.port_id)
            .ok_or_else(|| SimError::InvalidBurst {
                id: burst.id,
                reason: format!("pe {} has no port {}", self.id, burst.port_id),
            })?;
        self.ports[idx].record_response(burst.id)?;
        if !self.ports[idx].kind.is_read() {
            return Ok(());
        }
        let words = burst.words::<f32>()?;
        if words.len() > self.reserved[idx] {
            return Err(SimError::InvalidBurst {
                id: burst.id,
                reason: format!("{} words returned, {} outstanding", words.len(), self.reserved[idx]),
            });
        }
        self.reserved[idx] -= words.len();
        self.operands[idx].extend(words);
        Ok(())
    }

    fn compute(&mut self) {
        if self.results.len() >= self.config.buffer_depth {
            return;
        }
        if let (Some(&a), Some(&b)) = (self.operands[0].front(), self.operands[1].front()) {
            self.operands[0].pop_front();
            self.operands[1].pop_front();
            self.results.push_back(self.config.kernel.apply(a, b));
            self.computed += 1;
        }
    }

    /// Issue the next read of each operand stream, if its buffer has room for the whole burst.
    fn generate_reads(&mut self) -> Result<()> {
        for idx in 0..2 {
            let port = &self.ports[idx];
            if port.is_generated() {
                continue;
            }
            let words = self.chunk_words().min(port.remaining_words());
            let free = self.config.buffer_depth - self.operands[idx].len() - self.reserved[idx];
            if words > free {
                continue;
            }
            let burst = self.new_burst(MemOp::Read, port.id, port.next_addr(WORD_BYTES), words)?;
            self.reserved[idx] += words;
            self.ports[idx].record_issue(burst, words);
        }
        Ok(())
    }

    /// Issue a write once a full burst (or the whole tail) of results is buffered.
    fn generate_write(&mut self) -> Result<()> {
        let idx = PortKind::WriteP.index();
        let port = &self.ports[idx];
        let words = self.chunk_words().min(port.remaining_words());
        if port.is_generated() || words == 0 || self.results.len() < words {
            return Ok(());
        }
        let mut burst = self.new_burst(MemOp::Write, port.id, port.next_addr(WORD_BYTES), words)?;
        let payload: Vec<f32> = self.results.drain(..words).collect();
        burst.set_words(&payload)?;
        self.ports[idx].record_issue(burst, words);
        Ok(())
    }

    fn arbitrate(&mut self, now: Time) {
        let ports = &self.ports;
        let pick = self
            .arbiter
            .pick(ports.len(), |i| !ports[i].outgoing.is_empty());
        match pick.and_then(|i| self.ports[i].outgoing.pop_front()) {
            Some(mut burst) => {
                burst.times.depart_pe = now;
                debug!("@{}ns pe {} issues {}", now, self.id, burst);
                self.link.send(burst);
            }
            None => self.link.idle(),
        }
    }
}

impl ModuleBehaviors for PeClient {
    fn tick_one(&mut self, now: Time) -> Result<()> {
        if let Some(burst) = self.link.recv() {
            self.accept_response(burst)?;
        }
        self.compute();
        self.generate_reads()?;
        self.generate_write()?;
        self.arbitrate(now);
        Ok(())
    }

    fn finished(&self) -> bool {
        self.ports.iter().all(PortState::done)
    }

    fn summarize(&self, summary: &mut RunSummary) {
        summary.pes.push(PeSummary {
            pe: self.id,
            elements: self.computed,
            bursts_issued: self.ports.iter().map(PortState::bursts_issued).sum(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::port::{link, Input, Latch, Output, Port};
    use crate::sim::flat_mem::BackingStore;

    // Memory side of a PE link that answers every burst one tick later, straight from a store.
    struct EchoMemory {
        rx: Port<Input, Burst>,
        tx: Port<Output, Burst>,
        latches: Vec<Box<dyn Latch>>,
        store: BackingStore,
        pending: VecDeque<Burst>,
        seen: Vec<Burst>,
        answer: bool,
    }

    impl EchoMemory {
        fn attach(pe: &mut PeClient, store: BackingStore, answer: bool) -> Self {
            let mut rx = Port::new();
            let mut tx = Port::new();
            let req = link(&mut rx, &mut pe.link.req);
            let resp = link(&mut pe.link.resp, &mut tx);
            Self {
                rx,
                tx,
                latches: vec![Box::new(req), Box::new(resp)],
                store,
                pending: VecDeque::new(),
                seen: Vec::new(),
                answer,
            }
        }

        fn tick(&mut self) {
            let burst = self.rx.get();
            if burst.valid {
                self.seen.push(burst.clone());
                self.pending.push_back(burst);
            }
            match self.pending.pop_front().filter(|_| self.answer) {
                Some(mut burst) => {
                    if burst.op.is_write() {
                        burst.store_to(&mut self.store).unwrap();
                    } else {
                        burst.load_from(&self.store).unwrap();
                    }
                    self.tx.put(burst);
                }
                None => self.tx.put(Burst::noop()),
            }
        }

        fn latch(&self) {
            self.latches.iter().for_each(|l| l.latch());
        }
    }

    fn client(elements: usize, buffer_depth: usize, kernel: Kernel) -> PeClient {
        let range = PeRange {
            a: 0,
            b: 256,
            p: 512,
            elements,
        };
        let config = PeClientConfig {
            buffer_depth,
            burst_bytes: 16,
            kernel,
        };
        PeClient::new(1, range, config, Alignment::new(64).unwrap(), IdSource::new()).unwrap()
    }

    fn step(pe: &mut PeClient, mem: &mut EchoMemory, now: Time) {
        pe.tick_one(now).unwrap();
        mem.tick();
        mem.latch();
    }

    #[test]
    fn reads_stop_when_buffers_are_reserved() {
        let mut pe = client(32, 8, Kernel::Add);
        let mut mem = EchoMemory::attach(&mut pe, BackingStore::new(1024), false);
        for now in 1..=12 {
            step(&mut pe, &mut mem, now);
        }
        let [a, b, p] = PeClient::port_ids(1);
        let ports: Vec<_> = mem.seen.iter().map(|burst| burst.port_id).collect();
        assert_eq!(vec![a, b, a, b], ports);
        assert!(!ports.contains(&p));
        assert!(mem.seen.iter().all(|burst| burst.is_decomposed()));
        assert!(!pe.finished());
    }

    #[test]
    fn computes_and_writes_back_whole_range() {
        let mut store = BackingStore::new(1024);
        let a: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..10).map(|i| 0.5 * i as f32).collect();
        store.fill_words(0, &a).unwrap();
        store.fill_words(256, &b).unwrap();

        let mut pe = client(10, 8, Kernel::Mul);
        let mut mem = EchoMemory::attach(&mut pe, store, true);
        let mut now = 0;
        while !pe.finished() {
            now += 1;
            assert!(now < 500, "pe never finished");
            step(&mut pe, &mut mem, now);
        }

        let expected: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
        assert_eq!(expected, mem.store.read_words::<f32>(512, 10).unwrap());
        // 10 words in 4-word bursts: 4, 4, 2 on every port
        assert_eq!(3, pe.port(PortKind::WriteP).bursts_issued());
        let tail = mem.seen.iter().rev().find(|b| b.op.is_write()).unwrap();
        assert_eq!(8, tail.length);

        let mut summary = RunSummary::default();
        pe.summarize(&mut summary);
        assert_eq!(10, summary.pes[0].elements);
        assert_eq!(9, summary.pes[0].bursts_issued);
    }

    #[test]
    fn response_for_unknown_burst_is_fatal() {
        let mut pe = client(4, 4, Kernel::Add);
        let mut mem = EchoMemory::attach(&mut pe, BackingStore::new(1024), false);
        let [a, ..] = PeClient::port_ids(1);
        mem.tx.put(Burst::new(MemOp::Read, 77, 1, a, 0, 16));
        mem.latch();
        assert!(matches!(pe.tick_one(1), Err(SimError::UnknownBurst(77))));
    }

    #[test]
    fn rejects_buffer_smaller_than_burst() {
        let range = PeRange {
            a: 0,
            b: 0,
            p: 0,
            elements: 4,
        };
        let config = PeClientConfig {
            buffer_depth: 2,
            burst_bytes: 16,
            kernel: Kernel::Add,
        };
        let alignment = Alignment::new(64).unwrap();
        assert!(PeClient::new(0, range, config, alignment, IdSource::new()).is_err());
        let config = PeClientConfig {
            buffer_depth: 8,
            burst_bytes: 6,
            kernel: Kernel::Add,
        };
        assert!(PeClient::new(0, range, config, alignment, IdSource::new()).is_err());
    }

    #[test]
    fn range_past_address_space_is_fatal() {
        let range = PeRange {
            a: u64::MAX - 8,
            b: 0,
            p: 512,
            elements: 4,
        };
        let config = PeClientConfig {
            buffer_depth: 8,
            burst_bytes: 16,
            kernel: Kernel::Add,
        };
        let alignment = Alignment::new(64).unwrap();
        let mut pe = PeClient::new(0, range, config, alignment, IdSource::new()).unwrap();
        let _mem = EchoMemory::attach(&mut pe, BackingStore::new(1024), false);
        assert!(matches!(pe.tick_one(1), Err(SimError::OutOfBounds { len: 16, .. })));
    }
}
