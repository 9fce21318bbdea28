mod bitmap;
mod metadata;

pub use bitmap::BlockBitmap;
pub use metadata::{FileEntry, MetadataRegion};

/// Size of the backing image, in bytes.
pub const DISK_SIZE: u64 = 1 << 30;
/// Allocation granularity, in bytes.
pub const BLOCK_SIZE: u64 = 4096;
/// Total blocks across the whole image, metadata region included.
pub const NUM_BLOCKS: u64 = DISK_SIZE / BLOCK_SIZE;
/// Bytes reserved at the tail of the image for the bitmap and file table.
pub const META_RESERVE: u64 = 1 << 20;
/// Byte range of the image available for file payloads.
pub const DATA_REGION_SIZE: u64 = DISK_SIZE - META_RESERVE;
/// Blocks wholly inside the data region; the bitmap tracks exactly these.
pub const DATA_BLOCKS: u64 = DATA_REGION_SIZE / BLOCK_SIZE;
/// Upper bound on live files.
pub const MAX_FILES: usize = 1000;
/// Upper bound on a file name, in bytes, NUL-terminated.
pub const MAX_NAME: usize = 255;
/// Working set available to the sort engine.
pub const RAM_BUDGET: usize = 1 << 21;
/// Name reserved for the sort engine's scratch file.
pub const PAGEFILE_NAME: &str = "pagefile";

const _: () = assert!(DATA_REGION_SIZE % BLOCK_SIZE == 0);
