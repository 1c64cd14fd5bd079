//! The burst scheduler sits between PE-side links and the memory timing model.
//!
//! PE clock: every link delivers at most one burst per tick, which is validated, decomposed into
//! basic requests and queued. Every link also gets at most one ready response back per tick, taken
//! from the heads of its ports' queues in round-robin order.
//!
//! Memory clock: one queued request is offered to the timing model per tick, and the model is
//! advanced. A refused request is offered again, unchanged, before anything else. Reads become
//! complete when the model reports them; writes when the model accepts them.
//!
//! Reads are served from the backing store at release time. Before that, every write submitted
//! earlier in the read's ordering scope and not yet applied is copied into the store, so a read
//! always observes older writes no matter how the model reordered their requests.

use std::collections::{BTreeMap, VecDeque};

use log::debug;
use serde::Serialize;
use smallvec::SmallVec;

use crate::arbiter::RoundRobinArbiter;
use crate::base::behavior::ModuleBehaviors;
use crate::base::mem::HasMemory;
use crate::base::port::{link, Input, Latch, Output, Port};
use crate::burst::{Alignment, BasicRequest, Burst, BurstId, IdSource, PortId};
use crate::dram::{Completion, TimingModel};
use crate::error::{Result, SimError};
use crate::sim::flat_mem::BackingStore;
use crate::sim::summary::{PortSummary, RunSummary};
use crate::timeq::Time;

mod arena;


pub use arena::{BurstArena, BurstEntry, BurstStatus, ReqStatus, Retention};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub mem_clock_ns: Time,
    /// Poll per-port request queues round-robin instead of one global FIFO; also narrows the
    /// consistency replay scope to the read's own port.
    pub per_port_ordering: bool,
    pub retention: Retention,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mem_clock_ns: 1,
            per_port_ordering: false,
            retention: Retention::EvictDelivered,
        }
    }
}

/// Client end of a scheduler link: bursts go out on `req`, responses come back on `resp`.
#[derive(Default)]
pub struct BurstLink {
    pub req: Port<Output, Burst>,
    pub resp: Port<Input, Burst>,
}

impl BurstLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, burst: Burst) {
        self.req.put(burst);
    }

    pub fn idle(&mut self) {
        self.req.put(Burst::noop());
    }

    pub fn recv(&mut self) -> Option<Burst> {
        let burst = self.resp.get();
        burst.valid.then_some(burst)
    }
}

struct LinkEnd {
    req: Port<Input, Burst>,
    resp: Port<Output, Burst>,
    ports: SmallVec<[PortId; 4]>,
    arbiter: RoundRobinArbiter,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PortStats {
    pub submitted: u64,
    pub released: u64,
    // sum of arrive_pe - depart_pe over released bursts
    pub latency_sum: Time,
}

impl PortStats {
    pub fn mean_latency(&self) -> f64 {
        if self.released == 0 {
            return 0.0;
        }
        self.latency_sum as f64 / self.released as f64
    }
}

#[derive(Default)]
struct PortQueue {
    // undelivered bursts in submission order; responses leave from the head only
    bursts: VecDeque<BurstId>,
    // requests waiting for the timing model, with per-port ordering
    requests: VecDeque<BasicRequest>,
    stats: PortStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedStats {
    pub bursts_submitted: u64,
    pub bursts_released: u64,
    pub requests_queued: u64,
    pub requests_accepted: u64,
    pub requests_completed: u64,
    pub refusals: u64,
    pub replays: u64,
}

pub struct BurstScheduler<M> {
    config: SchedulerConfig,
    alignment: Alignment,
    ids: IdSource,
    model: M,
    store: BackingStore,
    arena: BurstArena,
    links: Vec<LinkEnd>,
    ports: BTreeMap<PortId, PortQueue>,
    // every undelivered burst in global submission order
    history: VecDeque<BurstId>,
    // global request FIFO
    queue: VecDeque<BasicRequest>,
    stalled: Option<BasicRequest>,
    submit_rr: RoundRobinArbiter,
    stats: SchedStats,
}

impl<M: TimingModel> BurstScheduler<M> {
    pub fn new(
        config: SchedulerConfig,
        alignment: Alignment,
        ids: IdSource,
        model: M,
        store: BackingStore,
    ) -> Self {
        Self {
            config,
            alignment,
            ids,
            model,
            store,
            arena: BurstArena::new(config.retention),
            links: Vec::new(),
            ports: BTreeMap::new(),
            history: VecDeque::new(),
            queue: VecDeque::new(),
            stalled: None,
            submit_rr: RoundRobinArbiter::new(),
            stats: SchedStats::default(),
        }
    }

    /// Attach a client link carrying the logical `ports`. Returns the channels the PE clock
    /// domain has to latch.
    pub fn connect(
        &mut self,
        client: &mut BurstLink,
        ports: &[PortId],
    ) -> Result<Vec<Box<dyn Latch>>> {
        if ports.is_empty() {
            return Err(SimError::config("scheduler link without ports"));
        }
        for port in ports {
            if self.ports.contains_key(port) {
                return Err(SimError::config(format!("port {} connected twice", port)));
            }
        }
        let mut end = LinkEnd {
            req: Port::new(),
            resp: Port::new(),
            ports: ports.iter().copied().collect(),
            arbiter: RoundRobinArbiter::new(),
        };
        let req = link(&mut end.req, &mut client.req);
        let resp = link(&mut client.resp, &mut end.resp);
        for &port in ports {
            self.ports.insert(port, PortQueue::default());
        }
        self.links.push(end);
        Ok(vec![Box::new(req), Box::new(resp)])
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn ids(&self) -> &IdSource {
        &self.ids
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut BackingStore {
        &mut self.store
    }

    pub fn arena(&self) -> &BurstArena {
        &self.arena
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    pub fn port_stats(&self, port: PortId) -> Option<PortStats> {
        self.ports.get(&port).map(|q| q.stats)
    }

    /// Nothing owned, queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.arena.live() == 0
            && self.queue.is_empty()
            && self.stalled.is_none()
            && self.ports.values().all(|q| q.requests.is_empty())
            && self.model.outstanding() == 0
    }

    /// Accept a burst from a port: validate, decompose and queue its children.
    pub fn submit(&mut self, mut burst: Burst) -> Result<BurstId> {
        self.validate(&burst)?;
        burst.decompose(self.alignment, &self.ids)?;
        let id = burst.id;
        let requests: SmallVec<[BasicRequest; 4]> = burst.requests().collect();
        let port = burst.port_id;
        debug!("submit {}", burst);

        self.arena.insert(burst)?;
        self.arena.open_children(id)?;

        self.stats.bursts_submitted += 1;
        self.stats.requests_queued += requests.len() as u64;
        let queue = self.ports.get_mut(&port).ok_or(SimError::InvalidBurst {
            id,
            reason: format!("port {} is not connected", port),
        })?;
        queue.bursts.push_back(id);
        queue.stats.submitted += 1;
        if self.config.per_port_ordering {
            queue.requests.extend(requests);
        } else {
            self.queue.extend(requests);
        }
        self.history.push_back(id);
        Ok(id)
    }

    fn validate(&self, burst: &Burst) -> Result<()> {
        let invalid = |reason: &str| SimError::InvalidBurst {
            id: burst.id,
            reason: reason.to_string(),
        };
        if !burst.valid {
            return Err(invalid("idle marker submitted as a burst"));
        }
        if !burst.op.is_data() {
            return Err(SimError::UnsupportedOp(burst.op));
        }
        if burst.length == 0 {
            return Err(invalid("zero length"));
        }
        if !self.ports.contains_key(&burst.port_id) {
            return Err(invalid("port is not connected"));
        }
        if burst.op.is_write() && burst.data.len() != burst.length {
            return Err(invalid("write payload does not match length"));
        }
        if burst.is_decomposed()
            && burst.num_requests() != self.alignment.req_count(burst.addr, burst.length)?
        {
            return Err(invalid("decomposed with a different alignment"));
        }
        self.store.check_range(burst.addr, burst.length)?;
        Ok(())
    }

    fn next_queued(&mut self) -> Option<BasicRequest> {
        if !self.config.per_port_ordering {
            return self.queue.pop_front();
        }
        let ports: SmallVec<[PortId; 8]> = self.ports.keys().copied().collect();
        let queues = &self.ports;
        let idx = self.submit_rr.pick(ports.len(), |i| {
            queues.get(&ports[i]).is_some_and(|q| !q.requests.is_empty())
        })?;
        self.ports.get_mut(&ports[idx])?.requests.pop_front()
    }

    /// Offer one request to the timing model.
    pub fn drive_submission(&mut self, now: Time) -> Result<()> {
        let request = match self.stalled.take() {
            Some(request) => request,
            None => match self.next_queued() {
                Some(mut request) => {
                    request.times.arrive_mem = now;
                    request
                }
                None => return Ok(()),
            },
        };
        let (id, burst_id, op, arrive) = (
            request.id,
            request.burst_id,
            request.op,
            request.times.arrive_mem,
        );
        match self.model.try_send(request) {
            Ok(()) => {
                self.arena.mark_submitted(id)?;
                self.stats.requests_accepted += 1;
                if op.is_write() {
                    self.arena.complete_child(id, burst_id, arrive, now)?;
                    self.stats.requests_completed += 1;
                }
            }
            Err(refused) => {
                debug!(
                    "@{}ns request {} of burst {} refused, retrying",
                    now, refused.id, refused.burst_id
                );
                self.stats.refusals += 1;
                self.stalled = Some(refused);
            }
        }
        Ok(())
    }

    /// Fold a serviced read into its burst.
    pub fn on_completion(&mut self, completion: Completion) -> Result<()> {
        let request = &completion.request;
        let arrive = request.times.arrive_mem;
        let depart = arrive + self.config.mem_clock_ns * completion.latency();
        self.arena
            .complete_child(request.id, request.burst_id, arrive, depart)?;
        self.stats.requests_completed += 1;
        Ok(())
    }

    /// Memory clock edge at `now`.
    pub fn mem_tick(&mut self, now: Time) -> Result<()> {
        self.drive_submission(now)?;
        let mut done = Vec::new();
        self.model.tick(|completion| done.push(completion));
        for completion in done {
            self.on_completion(completion)?;
        }
        Ok(())
    }

    /// PE clock edge at `now`: take one burst from every link, then release responses.
    pub fn pe_tick(&mut self, now: Time) -> Result<()> {
        for li in 0..self.links.len() {
            let burst = self.links[li].req.get();
            if !burst.valid {
                continue;
            }
            if !self.links[li].ports.contains(&burst.port_id) {
                return Err(SimError::InvalidBurst {
                    id: burst.id,
                    reason: format!("port {} arrived on the wrong link", burst.port_id),
                });
            }
            self.submit(burst)?;
        }
        self.release_responses(now)
    }

    /// Head burst of `port`, if it is ready and its response time has come.
    fn releasable_head(&self, port: PortId, now: Time) -> Option<BurstId> {
        let id = *self.ports.get(&port)?.bursts.front()?;
        let entry = self.arena.get(id).ok()?;
        (entry.is_ready() && entry.burst.times.depart_mem <= now).then_some(id)
    }

    /// Drive at most one response per link, from the head of one of its ports.
    pub fn release_responses(&mut self, now: Time) -> Result<()> {
        for li in 0..self.links.len() {
            let ports = self.links[li].ports.clone();
            let mut arbiter = std::mem::take(&mut self.links[li].arbiter);
            let pick = arbiter.pick(ports.len(), |i| {
                self.releasable_head(ports[i], now).is_some()
            });
            self.links[li].arbiter = arbiter;

            let head = pick.and_then(|i| Some((ports[i], self.releasable_head(ports[i], now)?)));
            let response = match head {
                Some((port, id)) => self.release(port, id, now)?,
                None => Burst::noop(),
            };
            self.links[li].resp.put(response);
        }
        Ok(())
    }

    fn release(&mut self, port: PortId, id: BurstId, now: Time) -> Result<Burst> {
        let is_write = self.arena.get(id)?.burst.op.is_write();
        if is_write {
            self.apply_write(id)?;
        } else {
            self.replay_before(port, id)?;
        }

        let mut burst = self.arena.deliver(id)?;
        if !is_write {
            burst.load_from(&self.store)?;
        }
        burst.times.arrive_pe = now;

        if let Some(queue) = self.ports.get_mut(&port) {
            queue.bursts.pop_front();
            queue.stats.released += 1;
            queue.stats.latency_sum += now.saturating_sub(burst.times.depart_pe);
        }
        if let Some(pos) = self.history.iter().position(|&h| h == id) {
            self.history.remove(pos);
        }
        self.stats.bursts_released += 1;
        debug!("@{}ns release {}", now, burst);
        Ok(burst)
    }

    fn apply_write(&mut self, id: BurstId) -> Result<bool> {
        let entry = self.arena.get_mut(id)?;
        if entry.applied {
            return Ok(false);
        }
        entry.burst.store_to(&mut self.store)?;
        entry.applied = true;
        Ok(true)
    }

    /// Apply every unapplied write submitted before `read` in its scope, oldest first.
    fn replay_before(&mut self, port: PortId, read: BurstId) -> Result<()> {
        let scope = if self.config.per_port_ordering {
            &self
                .ports
                .get(&port)
                .ok_or(SimError::UnknownBurst(read))?
                .bursts
        } else {
            &self.history
        };
        let mut pending: SmallVec<[BurstId; 8]> = SmallVec::new();
        for &id in scope.iter().take_while(|&&id| id != read) {
            let entry = self.arena.get(id)?;
            if entry.burst.op.is_write() && !entry.applied {
                pending.push(id);
            }
        }
        for id in pending {
            if self.apply_write(id)? {
                debug!("replay write burst {} ahead of read burst {}", id, read);
                self.stats.replays += 1;
            }
        }
        Ok(())
    }
}

impl<M: TimingModel> ModuleBehaviors for BurstScheduler<M> {
    fn tick_one(&mut self, now: Time) -> Result<()> {
        self.pe_tick(now)
    }

    fn finished(&self) -> bool {
        self.is_idle()
    }

    fn summarize(&self, summary: &mut RunSummary) {
        summary.scheduler = self.stats;
        summary.ports = self
            .ports
            .iter()
            .map(|(&port, q)| PortSummary {
                port,
                bursts: q.stats.released,
                mean_latency_ns: q.stats.mean_latency(),
            })
            .collect();
    }
}
