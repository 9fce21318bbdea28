use std::path::Path;

use log::{debug, info, warn};

use crate::backing_store::{BackingStore, BlockDevice};
use crate::collaborators::RandomSource;
use crate::structs::{
    BlockBitmap, FileEntry, MetadataRegion, BLOCK_SIZE, MAX_FILES, MAX_NAME, PAGEFILE_NAME,
};
use crate::Error;

/// Upper bound (exclusive) on the random values `create` fills a new file
/// with, matching the original generator's `rand() % 1000000`.
const RANDOM_VALUE_BOUND: u32 = 1_000_000;

/// Validate a file name against the naming rules: non-empty, no interior
/// NUL, fits in [`MAX_NAME`] bytes, and (unless the caller is the sort
/// engine allocating its own scratch file) not the reserved pagefile name.
fn validate_name(name: &str, allow_reserved: bool) -> Result<(), Error> {
    if name.is_empty() || name.contains('\0') {
        return Err(Error::InvalidName);
    }
    if name.len() > MAX_NAME {
        return Err(Error::NameTooLong);
    }
    if !allow_reserved && name == PAGEFILE_NAME {
        return Err(Error::ReservedName);
    }
    Ok(())
}

/// The whole flat file system: block bitmap, file table, and the device
/// both are persisted against. Every mutating call persists before
/// returning, mirroring the "best-effort flush after every write" model.
#[derive(Debug)]
pub struct FileSystem<D: BlockDevice> {
    device: D,
    bitmap: BlockBitmap,
    files: Vec<FileEntry>,
    free_bytes: u64,
}

impl FileSystem<BackingStore> {
    /// Open (creating if absent) the image at `path` and load its metadata.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let device = BackingStore::open_or_create(path)?;
        Self::from_device(device)
    }
}

impl<D: BlockDevice> FileSystem<D> {
    pub fn from_device(device: D) -> Result<Self, Error> {
        let (bitmap, files, free_bytes) = MetadataRegion::load(&device)?;
        info!(
            "loaded filesystem: {} files, {} bytes free",
            files.len(),
            free_bytes
        );
        Ok(Self {
            device,
            bitmap,
            files,
            free_bytes,
        })
    }

    fn persist(&mut self) -> Result<(), Error> {
        MetadataRegion::flush(&mut self.device, &self.bitmap, &self.files, self.free_bytes)
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.files.iter().position(|entry| entry.name == name)
    }

    pub fn list(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    pub fn bitmap(&self) -> &BlockBitmap {
        &self.bitmap
    }

    /// C5: create a file holding `count` freshly generated pseudo-random
    /// 32-bit integers, each in `[0, 1_000_000)`. The fill is generated a
    /// value at a time from `random` and written immediately, so the whole
    /// payload never has to sit in memory at once.
    pub fn create<R: RandomSource>(
        &mut self,
        name: &str,
        count: usize,
        random: &mut R,
    ) -> Result<(), Error> {
        let size_bytes = count as u64 * 4;
        let offset = self.reserve(name, size_bytes, false)?;
        let mut value_bytes = [0u8; 4];
        for i in 0..count {
            let value = random.next_u32_bounded(RANDOM_VALUE_BOUND) as i32;
            value_bytes.copy_from_slice(&value.to_le_bytes());
            self.device.write_at(offset + i as u64 * 4, &value_bytes)?;
        }
        self.finish_create(name, size_bytes, offset);
        self.persist()?;
        Ok(())
    }

    /// Allocate space and a table slot without writing a payload, for the
    /// sort engine's scratch file. The caller is responsible for filling
    /// every byte before reading any of it back.
    pub(crate) fn create_sized(&mut self, name: &str, size_bytes: u64) -> Result<(), Error> {
        let offset = self.reserve(name, size_bytes, true)?;
        self.finish_create(name, size_bytes, offset);
        self.persist()
    }

    /// Create a file from an exact in-memory payload. Used by tests that
    /// need deterministic content to assert against; real callers only ever
    /// produce a file's bytes through [`FileSystem::create`]'s random fill or
    /// through the sort engine writing a pagefile in place.
    #[cfg(test)]
    pub(crate) fn create_with_bytes(&mut self, name: &str, data: &[u8]) -> Result<(), Error> {
        let offset = self.reserve(name, data.len() as u64, false)?;
        self.device.write_at(offset, data)?;
        self.finish_create(name, data.len() as u64, offset);
        self.persist()
    }

    fn reserve(&mut self, name: &str, size_bytes: u64, allow_reserved: bool) -> Result<u64, Error> {
        validate_name(name, allow_reserved)?;
        if self.find_index(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        if self.files.len() >= MAX_FILES {
            return Err(Error::TableFull);
        }
        if size_bytes > self.free_bytes {
            return Err(Error::NoSpace);
        }
        self.bitmap.allocate_contiguous(size_bytes)
    }

    fn finish_create(&mut self, name: &str, size_bytes: u64, offset: u64) {
        self.files.push(FileEntry {
            name: name.to_string(),
            size_bytes,
            start_offset: offset,
        });
        self.free_bytes -= size_bytes;
        debug!("created '{name}' ({size_bytes} bytes at offset {offset})");
    }

    /// C5: delete a file, freeing its blocks.
    pub fn delete(&mut self, name: &str) -> Result<(), Error> {
        let index = self.find_index(name).ok_or(Error::NotFound)?;
        let entry = self.files.remove(index);
        self.bitmap.free_range(entry.start_offset, entry.size_bytes)?;
        self.free_bytes += entry.size_bytes;
        self.persist()?;
        debug!("deleted '{name}' ({} bytes freed)", entry.size_bytes);
        Ok(())
    }

    pub(crate) fn entry(&self, name: &str) -> Result<&FileEntry, Error> {
        let index = self.find_index(name).ok_or(Error::NotFound)?;
        Ok(&self.files[index])
    }

    /// C5: read a whole file's payload into memory.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, Error> {
        let entry = self.entry(name)?;
        let mut buf = vec![0u8; entry.size_bytes as usize];
        self.device.read_at(entry.start_offset, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn raw_read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        self.device.read_at(offset, buf)
    }

    pub(crate) fn raw_write(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        self.device.write_at(offset, buf)
    }

    pub(crate) fn is_range_free(&self, offset: u64, len: u64) -> Result<bool, Error> {
        self.bitmap.is_range_free(offset, len)
    }

    #[cfg(test)]
    pub(crate) fn into_device(self) -> D {
        self.device
    }

    /// C5: append `name2`'s bytes after `name1`'s and drop `name2` from the
    /// table. Fails rather than overwrite unrelated data if the blocks past
    /// `name1`'s current tail are not all free.
    pub fn concatenate(&mut self, name1: &str, name2: &str) -> Result<(), Error> {
        if name1 == name2 {
            return Err(Error::InvalidName);
        }
        let index1 = self.find_index(name1).ok_or(Error::NotFound)?;
        let index2 = self.find_index(name2).ok_or(Error::NotFound)?;

        let file1 = self.files[index1].clone();
        let file2 = self.files[index2].clone();

        let tail_offset = file1.start_offset + file1.size_bytes;
        let owned_blocks = file1.block_count();
        let total_blocks_needed = (file1.size_bytes + file2.size_bytes).div_ceil(BLOCK_SIZE);
        let additional_blocks = total_blocks_needed - owned_blocks;
        let additional_offset = file1.start_offset + owned_blocks * BLOCK_SIZE;
        let additional_len = additional_blocks * BLOCK_SIZE;

        if additional_blocks > 0 && !self.bitmap.is_range_free(additional_offset, additional_len)? {
            warn!("concatenate '{name1}' + '{name2}': no contiguous tail available");
            return Err(Error::NoContiguousTail);
        }

        let mut payload = vec![0u8; file2.size_bytes as usize];
        self.device.read_at(file2.start_offset, &mut payload)?;

        self.bitmap.free_range(file2.start_offset, file2.size_bytes)?;
        if additional_blocks > 0 {
            self.bitmap
                .mark_range(additional_offset / BLOCK_SIZE, additional_blocks, true)?;
        }
        self.device.write_at(tail_offset, &payload)?;

        self.files[index1].size_bytes += file2.size_bytes;
        let removed = self.files.remove(index2);
        debug_assert_eq!(removed.name, name2);

        self.persist()?;
        info!("concatenated '{name2}' onto '{name1}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{BLOCK_SIZE, DATA_REGION_SIZE, DISK_SIZE};
    use crate::test_support::MemoryDevice;

    fn fresh() -> FileSystem<MemoryDevice> {
        FileSystem::from_device(MemoryDevice::new(DISK_SIZE)).unwrap()
    }

    /// Hands out `0, 1, 2, ...` regardless of `bound`, so a test can predict
    /// exactly what `create` wrote without needing real randomness.
    struct CountingSource(u32);

    impl crate::collaborators::RandomSource for CountingSource {
        fn next_u32_bounded(&mut self, _bound: u32) -> u32 {
            let value = self.0;
            self.0 += 1;
            value
        }
    }

    #[test]
    fn create_fills_requested_count_of_integers() {
        let mut fs = fresh();
        let mut random = CountingSource(0);
        fs.create("numbers", 4, &mut random).unwrap();
        let bytes = fs.read("numbers").unwrap();
        assert_eq!(bytes.len(), 16);
        let values: Vec<i32> = bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn create_read_delete_round_trip() {
        let mut fs = fresh();
        fs.create_with_bytes("numbers", &[1, 2, 3, 4]).unwrap();
        assert_eq!(fs.read("numbers").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(fs.list().len(), 1);
        fs.delete("numbers").unwrap();
        assert!(matches!(fs.read("numbers"), Err(Error::NotFound)));
        assert_eq!(fs.free_bytes(), DATA_REGION_SIZE);
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let mut fs = fresh();
        fs.create_with_bytes("a", &[1]).unwrap();
        assert!(matches!(fs.create_with_bytes("a", &[2]), Err(Error::AlreadyExists)));
    }

    #[test]
    fn create_rejects_bad_names() {
        let mut fs = fresh();
        assert!(matches!(fs.create_with_bytes("", &[1]), Err(Error::InvalidName)));
        assert!(matches!(fs.create_with_bytes("pagefile", &[1]), Err(Error::ReservedName)));
        let long_name = "x".repeat(MAX_NAME + 1);
        assert!(matches!(fs.create_with_bytes(&long_name, &[1]), Err(Error::NameTooLong)));
    }

    #[test]
    fn create_fails_when_out_of_space() {
        let mut fs = fresh();
        let oversized = vec![0u8; (DATA_REGION_SIZE + 1) as usize];
        assert!(matches!(fs.create_with_bytes("big", &oversized), Err(Error::NoSpace)));
    }

    #[test]
    fn delete_missing_file_errors() {
        let mut fs = fresh();
        assert!(matches!(fs.delete("missing"), Err(Error::NotFound)));
    }

    #[test]
    fn concatenate_appends_and_removes_second_file() {
        let mut fs = fresh();
        fs.create_with_bytes("a", &[1, 2, 3, 4]).unwrap();
        fs.create_with_bytes("b", &[5, 6, 7, 8]).unwrap();
        fs.concatenate("a", "b").unwrap();
        assert_eq!(fs.read("a").unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(fs.read("b"), Err(Error::NotFound)));
        assert_eq!(fs.list().len(), 1);
    }

    #[test]
    fn concatenate_fails_when_tail_not_contiguous() {
        let mut fs = fresh();
        fs.create_with_bytes("a", &vec![1u8; BLOCK_SIZE as usize]).unwrap();
        fs.create_with_bytes("occupant", &[9]).unwrap();
        fs.delete("a").unwrap();
        fs.create_with_bytes("a", &vec![1u8; BLOCK_SIZE as usize]).unwrap();
        fs.create_with_bytes("b", &vec![2u8; BLOCK_SIZE as usize]).unwrap();
        assert!(matches!(
            fs.concatenate("a", "b"),
            Err(Error::NoContiguousTail)
        ));
    }

    #[test]
    fn concatenate_rejects_self() {
        let mut fs = fresh();
        fs.create_with_bytes("a", &[1, 2, 3]).unwrap();
        assert!(matches!(fs.concatenate("a", "a"), Err(Error::InvalidName)));
    }

    #[test]
    fn metadata_survives_reload() {
        let device = MemoryDevice::new(DISK_SIZE);
        let mut fs = FileSystem::from_device(device).unwrap();
        fs.create_with_bytes("a", &[1, 2, 3]).unwrap();
        let device = fs.into_device();
        let fs = FileSystem::from_device(device).unwrap();
        assert_eq!(fs.read("a").unwrap(), vec![1, 2, 3]);
    }
}
