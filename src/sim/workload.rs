//! Vector kernel workload: where the operand, result and golden vectors live, what they hold, and
//! how the elements are split among PEs.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::burst::{Addr, Word};
use crate::error::Result;
use crate::pe::PeRange;
use crate::sim::config::WorkloadConfig;
use crate::sim::flat_mem::BackingStore;

/// Regions are placed on this boundary.
pub const REGION_ALIGN: Addr = 256;

const WORD_BYTES: u64 = <f32 as Word>::BYTES as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    #[default]
    Add,
    Mul,
}

impl Kernel {
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Kernel::Add => a + b,
            Kernel::Mul => a * b,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Add => f.write_str("add"),
            Kernel::Mul => f.write_str("mul"),
        }
    }
}

fn align_up(addr: Addr, to: Addr) -> Addr {
    addr.div_ceil(to) * to
}

/// Base addresses of the four vectors: A at 0, then B, P and the golden result, each starting on a
/// [`REGION_ALIGN`] boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub a: Addr,
    pub b: Addr,
    pub p: Addr,
    pub gold: Addr,
    pub vec_len: usize,
}

impl Layout {
    pub fn new(vec_len: usize) -> Self {
        let bytes = vec_len as Addr * WORD_BYTES;
        let a = 0;
        let b = align_up(a + bytes, REGION_ALIGN);
        let p = align_up(b + bytes, REGION_ALIGN);
        let gold = align_up(p + bytes, REGION_ALIGN);
        Self {
            a,
            b,
            p,
            gold,
            vec_len,
        }
    }

    pub fn end(&self) -> Addr {
        self.gold + self.vec_len as Addr * WORD_BYTES
    }

    /// Backing store size covering every region, rounded up to whole alignment windows.
    pub fn store_bytes(&self, window: u64) -> usize {
        align_up(self.end().max(1), window.max(REGION_ALIGN)) as usize
    }

    /// Contiguous element ranges, one per PE; the first `vec_len % num_pes` PEs take one extra.
    pub fn split(&self, num_pes: usize) -> Vec<PeRange> {
        let base = self.vec_len / num_pes;
        let extra = self.vec_len % num_pes;
        let mut start = 0;
        (0..num_pes)
            .map(|pe| {
                let elements = base + usize::from(pe < extra);
                let offset = start as Addr * WORD_BYTES;
                start += elements;
                PeRange {
                    a: self.a + offset,
                    b: self.b + offset,
                    p: self.p + offset,
                    elements,
                }
            })
            .collect()
    }
}

pub struct Workload {
    pub kernel: Kernel,
    pub layout: Layout,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub gold: Vec<f32>,
}

impl Workload {
    pub fn generate(config: &WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut draw = || (rng.gen::<u32>() % 100) as f32 / 10.0;
        let mut a = Vec::with_capacity(config.vec_len);
        let mut b = Vec::with_capacity(config.vec_len);
        for _ in 0..config.vec_len {
            a.push(draw());
            b.push(draw());
        }
        let gold = a
            .iter()
            .zip(&b)
            .map(|(&x, &y)| config.kernel.apply(x, y))
            .collect();
        Self {
            kernel: config.kernel,
            layout: Layout::new(config.vec_len),
            a,
            b,
            gold,
        }
    }

    /// Write operands, a zeroed result region and the golden result into `store`.
    pub fn install(&self, store: &mut BackingStore) -> Result<()> {
        store.fill_words(self.layout.a, &self.a)?;
        store.fill_words(self.layout.b, &self.b)?;
        store.fill_words(self.layout.p, &vec![0.0f32; self.layout.vec_len])?;
        store.fill_words(self.layout.gold, &self.gold)
    }

    pub fn result(&self, store: &BackingStore) -> Result<Vec<f32>> {
        store.read_words(self.layout.p, self.layout.vec_len)
    }

    /// Number of result elements that differ from the golden result.
    pub fn mismatches(&self, result: &[f32]) -> usize {
        result
            .iter()
            .zip(&self.gold)
            .filter(|(got, want)| got != want)
            .count()
            + self.gold.len().abs_diff(result.len())
    }
}
