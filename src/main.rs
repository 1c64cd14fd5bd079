use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use burstsim::sim::config::{FrontendMode, RunConfig};
use burstsim::sim::log;
use burstsim::sim::top::Sim;
use clap::Parser;
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct BurstsimArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override memory standard (e.g. DDR4, HBM)")]
    standard: Option<String>,
    #[arg(long, help = "Override PE clock period in ns")]
    pe_clock_ns: Option<u64>,
    #[arg(long, help = "Override memory clock period in ns")]
    mem_clock_ns: Option<u64>,
    #[arg(long, help = "Override number of PEs")]
    num_pes: Option<usize>,
    #[arg(long, help = "Override frontend (burst, stream)")]
    frontend: Option<FrontendMode>,
    #[arg(long, help = "Poll per-port request queues instead of one global FIFO")]
    per_port_ordering: Option<bool>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help = "Write the run summary as JSON to this path")]
    summary_json: Option<PathBuf>,
}

// log level from the raw file, so section warnings are visible before the full config is loaded
fn configured_log_level(text: &str) -> Option<u64> {
    let table: Table = toml::from_str(text).ok()?;
    table.get("sim")?.get("log_level")?.as_integer()?.try_into().ok()
}

fn load(argv: &BurstsimArgs, text: &str) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_toml(text)?;

    // override toml configs with argv
    config.sim.log_level = argv.log.unwrap_or(config.sim.log_level);
    config.sim.pe_clock_ns = argv.pe_clock_ns.unwrap_or(config.sim.pe_clock_ns);
    config.sim.mem_clock_ns = argv.mem_clock_ns.unwrap_or(config.sim.mem_clock_ns);
    config.sim.frontend_mode = argv.frontend.unwrap_or(config.sim.frontend_mode);
    config.sim.per_port_ordering = argv.per_port_ordering.unwrap_or(config.sim.per_port_ordering);
    if let Some(path) = &argv.summary_json {
        config.sim.summary_json = Some(path.clone());
    }
    if let Some(standard) = &argv.standard {
        config.mem.standard = standard.clone();
    }
    config.pe.num_pes = argv.num_pes.unwrap_or(config.pe.num_pes);
    Ok(config)
}

fn run(argv: &BurstsimArgs) -> anyhow::Result<()> {
    let text = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    log::init(argv.log.or_else(|| configured_log_level(&text)).unwrap_or(0));
    let config = load(argv, &text)?;
    let mut sim = Sim::new(config)?;
    sim.simulate()?;
    Ok(())
}

pub fn main() -> ExitCode {
    let argv = BurstsimArgs::parse();
    match run(&argv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("burstsim: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
