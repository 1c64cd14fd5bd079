use log::debug;
use phf::phf_map;

use crate::burst::Alignment;
use crate::error::{Result, SimError};

/// Geometry of one device standard. Only what the scheduler and the reference timing model consume
/// is kept: the burst alignment width inputs and the default channel/rank counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardSpec {
    pub prefetch_size: u64,
    pub channel_width: u64,
    // WideIO2 runs two channel halves side by side
    pub width_multiplier: u64,
    pub channels: usize,
    pub ranks: usize,
}

impl StandardSpec {
    const fn new(prefetch_size: u64, channel_width: u64, channels: usize, ranks: usize) -> Self {
        Self {
            prefetch_size,
            channel_width,
            width_multiplier: 1,
            channels,
            ranks,
        }
    }

    const fn doubled(mut self) -> Self {
        self.width_multiplier = 2;
        self
    }

    /// Bytes moved by one memory burst.
    pub fn burst_bytes(&self) -> u64 {
        self.prefetch_size * self.channel_width * self.width_multiplier / 8
    }
}

static STANDARDS: phf::Map<&'static str, StandardSpec> = phf_map! {
    "DDR3" => StandardSpec::new(8, 64, 1, 1),
    "DDR4" => StandardSpec::new(8, 64, 1, 1),
    "SALP-MASA" => StandardSpec::new(8, 64, 1, 1),
    "LPDDR3" => StandardSpec::new(8, 32, 1, 1),
    "LPDDR4" => StandardSpec::new(16, 64, 2, 1),
    "GDDR5" => StandardSpec::new(8, 64, 1, 1),
    "HBM" => StandardSpec::new(4, 128, 8, 1),
    "WideIO" => StandardSpec::new(4, 128, 4, 1),
    "WideIO2" => StandardSpec::new(4, 64, 8, 1).doubled(),
    "DSARP" => StandardSpec::new(8, 64, 1, 1),
    "ALDRAM" => StandardSpec::new(8, 64, 1, 1),
    "TLDRAM" => StandardSpec::new(8, 64, 1, 1),
};

pub fn lookup(name: &str) -> Result<&'static StandardSpec> {
    if name.is_empty() {
        return Err(SimError::config("memory standard must be specified"));
    }
    STANDARDS.get(name).ok_or_else(|| {
        let mut known: Vec<_> = STANDARDS.keys().copied().collect();
        known.sort_unstable();
        SimError::config(format!(
            "unknown memory standard '{}', expected one of: {}",
            name,
            known.join(", ")
        ))
    })
}

/// A standard with the run's channel/rank overrides applied.
#[derive(Debug, Clone)]
pub struct ResolvedStandard {
    pub name: String,
    pub alignment: Alignment,
    pub channels: usize,
    pub ranks: usize,
}

/// Look up `name` and apply overrides; a zero override keeps the standard's default.
pub fn resolve(name: &str, channels: usize, ranks: usize) -> Result<ResolvedStandard> {
    let spec = lookup(name)?;
    let alignment = Alignment::new(spec.burst_bytes())?;
    let channels = if channels == 0 { spec.channels } else { channels };
    let ranks = if ranks == 0 { spec.ranks } else { ranks };
    if channels == 0 || ranks == 0 {
        return Err(SimError::config(format!(
            "{} needs at least one channel and one rank",
            name
        )));
    }
    debug!(
        "memory standard {}: {}B bursts, {} channel(s) x {} rank(s)",
        name,
        alignment.width(),
        channels,
        ranks
    );
    Ok(ResolvedStandard {
        name: name.to_string(),
        alignment,
        channels,
        ranks,
    })
}
