//! In-memory [`BlockDevice`] standing in for the real image file in unit
//! tests across the crate.
#![cfg(test)]

use crate::backing_store::BlockDevice;
use crate::Error;

#[derive(Debug, Default)]
pub(crate) struct MemoryDevice {
    bytes: Vec<u8>,
}

impl MemoryDevice {
    pub(crate) fn new(len: u64) -> Self {
        Self {
            bytes: vec![0u8; len as usize],
        }
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        let start = offset as usize;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
