use std::fmt::Display;

use crate::backing_store::BlockDevice;
use crate::structs::{BLOCK_SIZE, DATA_BLOCKS};
use crate::Error;

const BITS_IN_WORD: u64 = u64::BITS as u64;

/// Free/used bitmap over the blocks wholly inside the data region. One bit
/// per block, word-packed, little-endian within each `u64` word.
#[derive(Debug, Clone)]
pub struct BlockBitmap {
    words: Vec<u64>,
    count: u64,
}

impl BlockBitmap {
    pub fn new() -> Self {
        Self::with_count(DATA_BLOCKS)
    }

    fn with_count(count: u64) -> Self {
        let words = (count + BITS_IN_WORD - 1) / BITS_IN_WORD;
        Self {
            words: vec![0u64; words as usize],
            count,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    /// Get occupancy of a single block.
    pub fn get(&self, index: u64) -> Result<bool, Error> {
        if index >= self.count {
            return Err(Error::OutOfRange);
        }
        let (word, bit) = (index / BITS_IN_WORD, index % BITS_IN_WORD);
        Ok(self.words[word as usize] & (1u64 << bit) != 0)
    }

    fn set(&mut self, index: u64, used: bool) -> Result<(), Error> {
        if index >= self.count {
            return Err(Error::OutOfRange);
        }
        let (word, bit) = (index / BITS_IN_WORD, index % BITS_IN_WORD);
        if used {
            self.words[word as usize] |= 1u64 << bit;
        } else {
            self.words[word as usize] &= !(1u64 << bit);
        }
        Ok(())
    }

    /// Mark every block in `[start, start + len)` used or free.
    pub fn mark_range(&mut self, start: u64, len: u64, used: bool) -> Result<(), Error> {
        for index in start..start + len {
            self.set(index, used)?;
        }
        Ok(())
    }

    /// First-fit contiguous search: scan blocks from 0 upward, looking for
    /// `n_blocks` consecutive free blocks. Stops at the end of the bitmap
    /// (the data region).
    pub fn find_contiguous_free(&self, n_blocks: u64) -> Option<u64> {
        if n_blocks == 0 {
            return Some(0);
        }
        let mut run_start = 0u64;
        let mut run_len = 0u64;
        for block in 0..self.count {
            let used = self.get(block).expect("block is within bitmap bounds");
            if used {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = block;
                }
                run_len += 1;
                if run_len == n_blocks {
                    return Some(run_start);
                }
            }
        }
        None
    }

    /// Allocate the first contiguous run of blocks able to hold `n_bytes`
    /// and return its starting byte offset within the data region.
    pub fn allocate_contiguous(&mut self, n_bytes: u64) -> Result<u64, Error> {
        let n_blocks = n_bytes.div_ceil(BLOCK_SIZE);
        let start = self.find_contiguous_free(n_blocks).ok_or(Error::NoSpace)?;
        self.mark_range(start, n_blocks, true)?;
        Ok(start * BLOCK_SIZE)
    }

    /// Free the blocks spanned by a `n_bytes`-long region starting at
    /// `offset` (both measured in data-region-relative bytes).
    pub fn free_range(&mut self, offset: u64, n_bytes: u64) -> Result<(), Error> {
        let start = offset / BLOCK_SIZE;
        let n_blocks = n_bytes.div_ceil(BLOCK_SIZE);
        self.mark_range(start, n_blocks, false)
    }

    /// Whether `[offset, offset + n_bytes)` is entirely free.
    pub fn is_range_free(&self, offset: u64, n_bytes: u64) -> Result<bool, Error> {
        let start = offset / BLOCK_SIZE;
        let n_blocks = n_bytes.div_ceil(BLOCK_SIZE);
        for block in start..start + n_blocks {
            if block >= self.count || self.get(block)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn load<D: BlockDevice>(device: &D, position: u64) -> Result<Self, Error> {
        let mut bitmap = Self::new();
        let mut raw = vec![0u8; bitmap.size_in_bytes()];
        device.read_at(position, &mut raw)?;
        for (word, chunk) in bitmap.words.iter_mut().zip(raw.chunks_exact(8)) {
            *word = u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
        }
        Ok(bitmap)
    }

    pub fn flush<D: BlockDevice>(&self, device: &mut D, position: u64) -> Result<(), Error> {
        let mut raw = Vec::with_capacity(self.size_in_bytes());
        for word in &self.words {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        device.write_at(position, &raw)
    }
}

impl Default for BlockBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BlockBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "BlockBitmap {{")?;
        writeln!(f, "    count: {}", self.count)?;
        writeln!(f, "    used: [")?;
        for block in 0..self.count {
            if self.get(block).unwrap_or(false) {
                writeln!(f, "        {block}")?;
            }
        }
        writeln!(f, "    ]")?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryDevice;

    #[test]
    fn get_set_out_of_range() {
        let mut bitmap = BlockBitmap::with_count(10);
        assert!(bitmap.set(9, true).is_ok());
        assert_eq!(bitmap.get(9).unwrap(), true);
        assert!(matches!(bitmap.set(10, true), Err(Error::OutOfRange)));
        assert!(matches!(bitmap.get(10), Err(Error::OutOfRange)));
    }

    #[test]
    fn first_fit_contiguous() {
        let mut bitmap = BlockBitmap::with_count(20);
        bitmap.mark_range(0, 5, true).unwrap();
        bitmap.mark_range(7, 1, true).unwrap();
        assert_eq!(bitmap.find_contiguous_free(2), Some(5));
        assert_eq!(bitmap.find_contiguous_free(3), Some(8));
        bitmap.mark_range(5, 2, true).unwrap();
        assert_eq!(bitmap.find_contiguous_free(1), Some(8));
    }

    #[test]
    fn resets_run_on_used_block() {
        let mut bitmap = BlockBitmap::with_count(10);
        bitmap.mark_range(2, 1, true).unwrap();
        assert_eq!(bitmap.find_contiguous_free(3), Some(3));
    }

    #[test]
    fn no_space_past_bitmap_end() {
        let bitmap = BlockBitmap::with_count(4);
        assert_eq!(bitmap.find_contiguous_free(5), None);
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let mut bitmap = BlockBitmap::with_count(10);
        let offset = bitmap.allocate_contiguous(BLOCK_SIZE * 2).unwrap();
        assert_eq!(offset, 0);
        assert!(bitmap.get(0).unwrap());
        assert!(bitmap.get(1).unwrap());
        assert!(!bitmap.get(2).unwrap());
        bitmap.free_range(offset, BLOCK_SIZE * 2).unwrap();
        assert!(!bitmap.get(0).unwrap());
        assert!(!bitmap.get(1).unwrap());
    }

    #[test]
    fn allocate_rounds_up_to_block() {
        let mut bitmap = BlockBitmap::with_count(10);
        let offset = bitmap.allocate_contiguous(1).unwrap();
        assert_eq!(offset, 0);
        assert!(bitmap.get(0).unwrap());
        assert!(!bitmap.get(1).unwrap());
    }

    #[test]
    fn is_range_free_checks_tail() {
        let mut bitmap = BlockBitmap::with_count(10);
        bitmap.mark_range(3, 1, true).unwrap();
        assert!(bitmap.is_range_free(0, BLOCK_SIZE * 3).unwrap());
        assert!(!bitmap.is_range_free(0, BLOCK_SIZE * 4).unwrap());
    }

    #[test]
    fn load_and_flush_round_trip() {
        let mut bitmap = BlockBitmap::with_count(200);
        bitmap.mark_range(5, 10, true).unwrap();
        let mut device = MemoryDevice::new(4096);
        bitmap.flush(&mut device, 0).unwrap();
        let loaded = BlockBitmap::load(&device, 0).unwrap();
        assert_eq!(loaded.words, bitmap.words);
    }
}
