use std::fmt::Display;
use std::io::Write;

use crate::base::mem::HasMemory;
use crate::burst::{Addr, Word};

/// Flat byte array standing in for memory contents. Sized once at start-up to the workload's highest
/// address plus alignment slack; every access outside that range is a fatal error.
#[derive(Debug, Clone)]
pub struct BackingStore {
    bytes: Vec<u8>,
}

impl HasMemory for BackingStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read_impl(&self, addr: usize, n: usize) -> &[u8] {
        &self.bytes[addr..addr + n]
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) {
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
    }
}

impl BackingStore {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    /// Fill consecutive words starting at `addr`.
    pub fn fill_words<T: Word>(&mut self, addr: Addr, words: &[T]) -> crate::error::Result<()> {
        self.write(addr, &crate::burst::payload::pack_words(words))
    }

    pub fn read_words<T: Word>(&self, addr: Addr, count: usize) -> crate::error::Result<Vec<T>> {
        let bytes = self.read(addr, count * T::BYTES)?;
        crate::burst::payload::unpack_words(bytes)
    }

    /// Dump `count` words starting at `addr` to `sink`, one per line.
    pub fn dump_words<T, W>(&self, addr: Addr, count: usize, sink: &mut W) -> anyhow::Result<()>
    where
        T: Word + Display,
        W: Write,
    {
        for word in self.read_words::<T>(addr, count)? {
            writeln!(sink, "{}", word)?;
        }
        sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn out_of_range_access_fails() {
        let mut mem = BackingStore::new(64);
        assert!(mem.write(60, &[0u8; 4]).is_ok());
        let err = mem.write(62, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, SimError::OutOfBounds { addr: 62, len: 4, capacity: 64 }));
        assert!(mem.read(u64::MAX, 1).is_err());
    }

    #[test]
    fn words_round_trip_at_unaligned_address() {
        let mut mem = BackingStore::new(64);
        mem.fill_words(3, &[1.25f32, 2.5, 3.75]).unwrap();
        assert_eq!(vec![1.25f32, 2.5, 3.75], mem.read_words::<f32>(3, 3).unwrap());
        assert_eq!(2.5f32, mem.read_word::<f32>(7).unwrap());
    }

    #[test]
    fn dump_writes_one_word_per_line() {
        let mut mem = BackingStore::new(32);
        mem.fill_words(8, &[1u32, 22, 333]).unwrap();
        let mut sink = Vec::new();
        mem.dump_words::<u32, _>(8, 3, &mut sink).unwrap();
        assert_eq!("1\n22\n333\n", String::from_utf8(sink).unwrap());
    }
}
