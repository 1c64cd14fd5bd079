//! Splitting of arbitrary `[addr, addr+length)` ranges into alignment windows.
//!
//! The request count is a single ceiling division from the aligned base:
//!
//! ```text
//! count = ceil((offset + length) / W)    for length > 0
//! count = 0                              for length == 0
//! ```
//!
//! where `offset = addr mod W`. It is defined for every (addr, length) pair whose end fits in the
//! address space; a range running past `Addr::MAX` is `SimError::OutOfBounds`. The chunk address
//! generator walks exactly `count` windows from the aligned base, so both always agree.

use crate::burst::Addr;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    width: u64,
}

/// One alignment window touched by a burst. `start..end` is the part of the window the burst
/// actually covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub aligned: Addr,
    pub start: Addr,
    pub end: Addr,
}

impl Alignment {
    pub fn new(width: u64) -> Result<Self> {
        if width == 0 || !width.is_power_of_two() {
            return Err(SimError::config(format!(
                "burst alignment width {width} is not a power of two"
            )));
        }
        Ok(Self { width })
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn align_down(&self, addr: Addr) -> Addr {
        addr & !(self.width - 1)
    }

    pub fn offset(&self, addr: Addr) -> u64 {
        addr & (self.width - 1)
    }

    /// Exclusive end of `[addr, addr+length)`.
    pub fn range_end(addr: Addr, length: usize) -> Result<Addr> {
        u64::try_from(length)
            .ok()
            .and_then(|len| addr.checked_add(len))
            .ok_or(SimError::OutOfBounds {
                addr,
                len: length,
                capacity: usize::MAX,
            })
    }

    pub fn req_count(&self, addr: Addr, length: usize) -> Result<usize> {
        if length == 0 {
            return Ok(0);
        }
        Self::range_end(addr, length)?;
        // offset <= addr, so this cannot overflow once the end fits
        Ok((self.offset(addr) + length as u64).div_ceil(self.width) as usize)
    }

    pub fn chunk_addrs(&self, addr: Addr, length: usize) -> Result<impl Iterator<Item = Addr>> {
        let base = self.align_down(addr);
        let width = self.width;
        let count = self.req_count(addr, length)? as u64;
        Ok((0..count).map(move |i| base + i * width))
    }

    pub fn chunks(&self, addr: Addr, length: usize) -> Result<impl Iterator<Item = Chunk>> {
        let end = Self::range_end(addr, length)?;
        let width = self.width;
        Ok(self.chunk_addrs(addr, length)?.map(move |aligned| Chunk {
            aligned,
            start: aligned.max(addr),
            // the top window ends exactly at 2^64
            end: aligned + (end - aligned).min(width),
        }))
    }
}
