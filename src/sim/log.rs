use env_logger::Builder;
use log::LevelFilter;

/// Default filter for a `sim.log_level` value: 0 warnings only, 1 info, 2 and up debug.
pub fn level_filter(level: u64) -> LevelFilter {
    match level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Install the global logger. `RUST_LOG` takes precedence over `level`. A logger that is already
/// installed is kept.
pub fn init(level: u64) {
    let _ = Builder::new()
        .filter_level(level_filter(level))
        .parse_default_env()
        .try_init();
}
