//! Memory timing models. The scheduler only talks to the [`TimingModel`] trait; which device is
//! behind it, and how it reorders or delays requests, is up to the implementation.

use crate::burst::BasicRequest;
use crate::timeq::Cycle;

pub mod queue_model;
pub mod standard;

pub use queue_model::{QueueModelConfig, QueueTimingModel};
pub use standard::{ResolvedStandard, StandardSpec};

/// A serviced read, reported from inside [`TimingModel::tick`]. `arrive` and `depart` are memory
/// clock cycles of the model.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request: BasicRequest,
    pub arrive: Cycle,
    pub depart: Cycle,
}

impl Completion {
    pub fn latency(&self) -> Cycle {
        self.depart.saturating_sub(self.arrive)
    }
}

pub trait TimingModel {
    /// Offer one basic request. A model whose queue is full hands the request back unchanged; the
    /// caller retries it on a later tick.
    fn try_send(&mut self, request: BasicRequest) -> Result<(), BasicRequest>;

    /// Advance by one memory clock period, reporting every read that finished service.
    fn tick<F: FnMut(Completion)>(&mut self, on_complete: F);

    /// Requests accepted but not yet retired.
    fn outstanding(&self) -> usize;

    /// Current memory cycle.
    fn cycle(&self) -> Cycle;
}
