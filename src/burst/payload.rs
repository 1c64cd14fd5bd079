use crate::burst::Burst;
use crate::error::{Result, SimError};

/// Fixed-width value that can be packed into a burst payload, little endian.
pub trait Word: Copy + Default + std::fmt::Debug + 'static {
    const BYTES: usize;
    // value driven on a data signal that carries nothing
    const IDLE: Self;

    fn from_le_slice(bytes: &[u8]) -> Self;
    fn extend_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_word {
    ($($t:ty => $idle:expr),* $(,)?) => {
        $(
            impl Word for $t {
                const BYTES: usize = std::mem::size_of::<$t>();
                const IDLE: Self = $idle;

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }

                fn extend_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_word!(
    u32 => u32::MAX,
    i32 => -1,
    u64 => u64::MAX,
    i64 => -1,
    f32 => -1.0,
    f64 => -1.0,
);

pub fn check_word_aligned<T: Word>(length: usize) -> Result<()> {
    if length % T::BYTES != 0 {
        return Err(SimError::Alignment {
            length,
            word_bytes: T::BYTES,
        });
    }
    Ok(())
}

pub fn pack_words<T: Word>(words: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * T::BYTES);
    for &word in words {
        word.extend_le(&mut out);
    }
    out
}

pub fn unpack_words<T: Word>(bytes: &[u8]) -> Result<Vec<T>> {
    check_word_aligned::<T>(bytes.len())?;
    Ok(bytes.chunks_exact(T::BYTES).map(T::from_le_slice).collect())
}

impl Burst {
    /// Stage `words` as this burst's payload. The words must cover exactly `length` bytes.
    pub fn set_words<T: Word>(&mut self, words: &[T]) -> Result<()> {
        check_word_aligned::<T>(self.length)?;
        if words.len() * T::BYTES != self.length {
            return Err(SimError::BufferUnderflow {
                needed: self.length,
                available: words.len() * T::BYTES,
            });
        }
        self.data = pack_words(words);
        Ok(())
    }

    pub fn words<T: Word>(&self) -> Result<Vec<T>> {
        check_word_aligned::<T>(self.length)?;
        unpack_words(&self.data[..self.length.min(self.data.len())])
    }

    pub fn has_unread<T: Word>(&self) -> bool {
        self.read_cursor + T::BYTES <= self.data.len()
    }

    /// Hand out the next unread word of the payload, front to back.
    pub fn pop_word<T: Word>(&mut self) -> Option<T> {
        if !self.has_unread::<T>() {
            return None;
        }
        let start = self.read_cursor;
        self.read_cursor += T::BYTES;
        Some(T::from_le_slice(&self.data[start..start + T::BYTES]))
    }
}
