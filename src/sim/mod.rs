pub mod config;
pub mod flat_mem;
pub mod log;
pub mod summary;
pub mod top;
pub mod workload;
