use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::structs::DISK_SIZE;
use crate::Error;

/// The image file backing the whole file system: exactly [`DISK_SIZE`] bytes,
/// addressed with positioned reads/writes so callers never share a cursor.
pub trait BlockDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error>;
    fn flush(&mut self) -> Result<(), Error>;
}

#[derive(Debug)]
pub struct BackingStore {
    file: File,
}

impl BackingStore {
    /// Open an existing image, or create a zero-filled one of exactly
    /// [`DISK_SIZE`] bytes.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if is_new {
            file.set_len(DISK_SIZE)?;
            file.sync_all()?;
        }
        Ok(Self { file })
    }

    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = OpenOptions::new().read(true).write(false).open(path)?;
        Ok(Self { file })
    }
}

impl BlockDevice for BackingStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryDevice;

    #[test]
    fn round_trip() {
        let mut dev = MemoryDevice::new(1024);
        dev.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        dev.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(dev.flush().is_ok());
    }

    #[test]
    fn open_or_create_sizes_new_image() {
        let dir = std::env::temp_dir().join(format!("flatfs-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("image.bin");
        let _ = std::fs::remove_file(&path);
        let store = BackingStore::open_or_create(&path).unwrap();
        assert_eq!(store.file.metadata().unwrap().len(), DISK_SIZE);
        std::fs::remove_file(&path).unwrap();
    }
}
