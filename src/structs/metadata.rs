use bytemuck::{Pod, Zeroable};

use crate::backing_store::BlockDevice;
use crate::structs::{BlockBitmap, BLOCK_SIZE, DATA_REGION_SIZE, MAX_FILES, MAX_NAME};
use crate::Error;

const MAGIC: u32 = 0x464c_4154; // "FLAT"

/// In-memory view of one live file: its name, payload size, and the
/// block-aligned byte offset its contents start at within the data region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
    pub start_offset: u64,
}

impl FileEntry {
    pub fn block_count(&self) -> u64 {
        self.size_bytes.div_ceil(BLOCK_SIZE)
    }
}

/// On-disk layout of a single [`FileEntry`], fixed-size so the file table
/// can be addressed by index without a separate length prefix.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FileEntryRaw {
    name: [u8; MAX_NAME],
    name_len: u8,
    size_bytes: u64,
    start_offset: u64,
}

impl FileEntryRaw {
    const SIZE: usize = std::mem::size_of::<Self>();

    fn from_entry(entry: &FileEntry) -> Self {
        let mut name = [0u8; MAX_NAME];
        let bytes = entry.name.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        Self {
            name,
            name_len: bytes.len() as u8,
            size_bytes: entry.size_bytes,
            start_offset: entry.start_offset,
        }
    }

    fn to_entry(self) -> FileEntry {
        let name = String::from_utf8_lossy(&self.name[..self.name_len as usize]).into_owned();
        FileEntry {
            name,
            size_bytes: self.size_bytes,
            start_offset: self.start_offset,
        }
    }
}

/// Fixed-size header persisted ahead of the bitmap and file table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: u32,
    file_count: u32,
    free_bytes: u64,
}

/// Byte layout and (de)serialization of the metadata region: a fixed header,
/// the block bitmap, and a bounded array of [`FileEntry`] slots. Load/save
/// round-trip exactly; the in-region layout is otherwise private, as spec'd.
pub struct MetadataRegion;

impl MetadataRegion {
    const HEADER_SIZE: usize = std::mem::size_of::<Header>();

    fn region_start() -> u64 {
        DATA_REGION_SIZE
    }

    fn header_position() -> u64 {
        Self::region_start()
    }

    fn bitmap_position() -> u64 {
        Self::header_position() + Self::HEADER_SIZE as u64
    }

    fn table_position(bitmap_bytes: usize) -> u64 {
        Self::bitmap_position() + bitmap_bytes as u64
    }

    /// Initialize a brand-new, empty metadata region in memory (nothing is
    /// written to `device` until [`Self::flush`] is called).
    pub fn empty() -> (BlockBitmap, Vec<FileEntry>, u64) {
        (BlockBitmap::new(), Vec::new(), DATA_REGION_SIZE)
    }

    pub fn load<D: BlockDevice>(device: &D) -> Result<(BlockBitmap, Vec<FileEntry>, u64), Error> {
        let mut header_raw = [0u8; Self::HEADER_SIZE];
        device.read_at(Self::header_position(), &mut header_raw)?;
        let header: Header = bytemuck::pod_read_unaligned(&header_raw);
        if header.magic != MAGIC {
            return Ok(Self::empty());
        }

        let bitmap = BlockBitmap::load(device, Self::bitmap_position())?;
        let table_position = Self::table_position(bitmap.size_in_bytes());

        let mut files = Vec::with_capacity(header.file_count as usize);
        let mut raw = vec![0u8; FileEntryRaw::SIZE];
        for index in 0..header.file_count as u64 {
            device.read_at(table_position + index * FileEntryRaw::SIZE as u64, &mut raw)?;
            let entry: FileEntryRaw = bytemuck::pod_read_unaligned(&raw);
            files.push(entry.to_entry());
        }
        Ok((bitmap, files, header.free_bytes))
    }

    pub fn flush<D: BlockDevice>(
        device: &mut D,
        bitmap: &BlockBitmap,
        files: &[FileEntry],
        free_bytes: u64,
    ) -> Result<(), Error> {
        assert!(files.len() <= MAX_FILES);
        let header = Header {
            magic: MAGIC,
            file_count: files.len() as u32,
            free_bytes,
        };
        device.write_at(Self::header_position(), bytemuck::bytes_of(&header))?;
        bitmap.flush(device, Self::bitmap_position())?;
        let table_position = Self::table_position(bitmap.size_in_bytes());
        for (index, entry) in files.iter().enumerate() {
            let raw = FileEntryRaw::from_entry(entry);
            device.write_at(
                table_position + index as u64 * FileEntryRaw::SIZE as u64,
                bytemuck::bytes_of(&raw),
            )?;
        }
        device.flush()
    }
}
