//! Logical memory operations ("bursts") issued by processing elements, and the basic requests they
//! decompose into.
//!
//! A burst may start at any byte address and span any length. Before it reaches the timing model it
//! is split into basic requests, one per alignment window it touches (see [`align`]). Bursts travel
//! between components by value: the issuing side builds and decomposes it, the scheduler owns it while
//! it is in flight, and hands it back with its payload and timestamps filled in.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;

use crate::base::mem::HasMemory;
use crate::error::Result;
use crate::timeq::Time;

pub mod align;
pub mod payload;

pub use align::{Alignment, Chunk};
pub use payload::Word;

pub type Addr = u64;
pub type BurstId = u64;
pub type ReqId = u64;
pub type PeId = usize;
pub type PortId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum MemOp {
    #[default]
    Read,
    Write,
    Refresh,
    PowerDown,
    SelfRefresh,
    Extension,
}

impl MemOp {
    /// Only reads and writes carry data and can be issued as bursts.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl fmt::Display for MemOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemOp::Read => "READ",
            MemOp::Write => "WRITE",
            MemOp::Refresh => "REFRESH",
            MemOp::PowerDown => "POWERDOWN",
            MemOp::SelfRefresh => "SELFREFRESH",
            MemOp::Extension => "EXTENSION",
        };
        f.write_str(name)
    }
}

/// Boundary crossings of a request or burst on the global timeline, in ns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub depart_pe: Time,
    pub arrive_mem: Time,
    pub depart_mem: Time,
    pub arrive_pe: Time,
}

/// One alignment-sized chunk of a burst; the unit the timing model services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicRequest {
    pub id: ReqId,
    pub addr: Addr,
    pub op: MemOp,
    pub burst_id: BurstId,
    pub pe_id: PeId,
    pub port_id: PortId,
    pub times: Timestamps,
}

/// Shared allocator for burst and request ids. Both sequences are unique and strictly increasing
/// for the lifetime of a run, regardless of which component allocates.
#[derive(Debug, Clone, Default)]
pub struct IdSource {
    next_burst: Arc<AtomicU64>,
    next_req: Arc<AtomicU64>,
}

impl IdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_burst(&self) -> BurstId {
        self.next_burst.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_req(&self) -> ReqId {
        self.next_req.fetch_add(1, Ordering::Relaxed)
    }

    pub fn bursts_allocated(&self) -> u64 {
        self.next_burst.load(Ordering::Relaxed)
    }
}

/// Descriptor of one logical memory operation. `valid == false` is the idle value a link carries on
/// ticks with nothing to transfer.
#[derive(Debug, Clone, Default)]
pub struct Burst {
    pub valid: bool,
    pub op: MemOp,
    pub id: BurstId,
    pub pe_id: PeId,
    pub port_id: PortId,
    pub addr: Addr,
    pub length: usize,
    pub req_ids: SmallVec<[ReqId; 4]>,
    pub req_addrs: SmallVec<[Addr; 4]>,
    // write data staged out, or read data staged in
    pub data: Vec<u8>,
    // bytes of `data` already handed out word by word
    read_cursor: usize,
    pub times: Timestamps,
}

impl Burst {
    pub fn new(
        op: MemOp,
        id: BurstId,
        pe_id: PeId,
        port_id: PortId,
        addr: Addr,
        length: usize,
    ) -> Self {
        Self {
            valid: true,
            op,
            id,
            pe_id,
            port_id,
            addr,
            length,
            ..Self::default()
        }
    }

    pub fn noop() -> Self {
        Self::default()
    }

    /// Exclusive end address, saturating at the top of the address space.
    pub fn end(&self) -> Addr {
        self.addr.saturating_add(self.length as Addr)
    }

    pub fn is_decomposed(&self) -> bool {
        !self.req_ids.is_empty()
    }

    pub fn num_requests(&self) -> usize {
        self.req_ids.len()
    }

    /// Allocate one request id per aligned chunk and record the chunk addresses. Idempotent.
    pub fn decompose(&mut self, alignment: Alignment, ids: &IdSource) -> Result<()> {
        if self.is_decomposed() {
            return Ok(());
        }
        self.req_addrs = alignment.chunk_addrs(self.addr, self.length)?.collect();
        self.req_ids = self.req_addrs.iter().map(|_| ids.next_req()).collect();
        Ok(())
    }

    /// Basic requests for every child, carrying the burst's current timestamps.
    pub fn requests(&self) -> impl Iterator<Item = BasicRequest> + '_ {
        self.req_ids
            .iter()
            .zip(self.req_addrs.iter())
            .map(move |(&id, &addr)| BasicRequest {
                id,
                addr,
                op: self.op,
                burst_id: self.id,
                pe_id: self.pe_id,
                port_id: self.port_id,
                times: self.times,
            })
    }

    /// Copy `[addr, addr+length)` out of the store into the payload.
    pub fn load_from<M: HasMemory>(&mut self, mem: &M) -> Result<()> {
        let bytes = mem.read(self.addr, self.length)?;
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.read_cursor = 0;
        Ok(())
    }

    /// Copy the payload into the store at `addr`.
    pub fn store_to<M: HasMemory>(&self, mem: &mut M) -> Result<()> {
        mem.write(self.addr, &self.data[..self.length.min(self.data.len())])
    }
}

impl fmt::Display for Burst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return f.write_str("<idle>");
        }
        write!(
            f,
            "burst {} {} pe {} port {} [{:#x}, {:#x}) reqs {} depart_pe {} arrive_mem {} depart_mem {} arrive_pe {}",
            self.id,
            self.op,
            self.pe_id,
            self.port_id,
            self.addr,
            self.end(),
            self.req_ids.len(),
            self.times.depart_pe,
            self.times.arrive_mem,
            self.times.depart_mem,
            self.times.arrive_pe,
        )
    }
}
