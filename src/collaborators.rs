use rand::Rng;

use crate::Error;

/// The RNG `create` fills new payloads from. A trait seam so tests can swap
/// in a deterministic source instead of `SystemRandom`.
pub trait RandomSource {
    /// A uniformly distributed value in `[0, bound)`.
    fn next_u32_bounded(&mut self, bound: u32) -> u32;
}

#[derive(Debug, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn next_u32_bounded(&mut self, bound: u32) -> u32 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// The merge engine's working buffer, acquired once per sort and sized to
/// the run-generation segment or the three merge windows. A trait seam
/// rather than a bare `Vec<u8>` so a future caller could back it with
/// something other than the heap (a memory-mapped scratch region, a pool)
/// without touching [`crate::sort`].
pub trait LargeBuffer {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
    fn len(&self) -> usize {
        self.as_slice().len()
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct HeapBuffer {
    bytes: Box<[u8]>,
}

impl HeapBuffer {
    pub fn allocate(len: usize) -> Result<Self, Error> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory)?;
        bytes.resize(len, 0u8);
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }
}

impl LargeBuffer for HeapBuffer {
    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_random_stays_in_bound() {
        let mut source = SystemRandom;
        for _ in 0..1000 {
            let value = source.next_u32_bounded(1_000_000);
            assert!(value < 1_000_000);
        }
    }

    #[test]
    fn heap_buffer_is_zeroed_and_sized() {
        let buffer = HeapBuffer::allocate(4096).unwrap();
        assert_eq!(buffer.len(), 4096);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn heap_buffer_is_writable() {
        let mut buffer = HeapBuffer::allocate(8).unwrap();
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
