pub mod arbiter;
pub mod base;
pub mod burst;
pub mod dram;
pub mod error;
pub mod pe;
pub mod sched;
pub mod sim;
pub mod stream;
pub mod timeq;
