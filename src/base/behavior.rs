use crate::error::Result;
use crate::sim::summary::RunSummary;
use crate::timeq::Time;

/// A component clocked by the PE clock. `tick_one` does one tick's worth of work at simulated time
/// `now` and returns; it must only read link values latched in an earlier tick.
pub trait ModuleBehaviors {
    fn tick_one(&mut self, now: Time) -> Result<()>;

    /// Whether this component has finished all the work it will ever do.
    fn finished(&self) -> bool {
        true
    }

    fn summarize(&self, _summary: &mut RunSummary) {}
}
