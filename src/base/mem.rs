use crate::burst::{Addr, Word};
use crate::error::{Result, SimError};

/// Trait for simulated memories. Implementors provide raw, unchecked access; the provided methods
/// bounds-check against the configured capacity.
pub trait HasMemory {
    fn capacity(&self) -> usize;
    fn read_impl(&self, addr: usize, n: usize) -> &[u8];
    fn write_impl(&mut self, addr: usize, data: &[u8]);

    fn check_range(&self, addr: Addr, n: usize) -> Result<usize> {
        let capacity = self.capacity();
        let fits = usize::try_from(addr)
            .ok()
            .and_then(|start| start.checked_add(n).map(|end| (start, end)))
            .filter(|&(_, end)| end <= capacity);
        match fits {
            Some((start, _)) => Ok(start),
            None => Err(SimError::OutOfBounds {
                addr,
                len: n,
                capacity,
            }),
        }
    }

    fn read(&self, addr: Addr, n: usize) -> Result<&[u8]> {
        let start = self.check_range(addr, n)?;
        Ok(self.read_impl(start, n))
    }

    fn write(&mut self, addr: Addr, data: &[u8]) -> Result<()> {
        let start = self.check_range(addr, data.len())?;
        self.write_impl(start, data);
        Ok(())
    }

    fn read_word<T: Word>(&self, addr: Addr) -> Result<T> {
        self.read(addr, T::BYTES).map(T::from_le_slice)
    }

    fn write_word<T: Word>(&mut self, addr: Addr, value: T) -> Result<()> {
        let mut bytes = Vec::with_capacity(T::BYTES);
        value.extend_le(&mut bytes);
        self.write(addr, &bytes)
    }
}
