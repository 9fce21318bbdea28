use log::{debug, info, warn};

use crate::backing_store::BlockDevice;
use crate::collaborators::{HeapBuffer, LargeBuffer};
use crate::filesystem::FileSystem;
use crate::structs::{PAGEFILE_NAME, RAM_BUDGET};
use crate::Error;

/// Ints in memory at once before falling back to the external merge path.
const MAX_INTS_IN_MEMORY: usize = RAM_BUDGET / 4;

/// The three-window split of the working buffer used by [`merge_runs`]:
/// 40% for each run's read-ahead window, 20% for the merged output window.
const BUFFER_WINDOW_INTS: usize = RAM_BUDGET * 2 / 5 / 4;
const OUT_WINDOW_INTS: usize = RAM_BUDGET / 5 / 4;

const _: () = assert!((2 * BUFFER_WINDOW_INTS + OUT_WINDOW_INTS) * 4 <= RAM_BUDGET);

fn read_int(bytes: &[u8], index: usize) -> i32 {
    i32::from_le_bytes(bytes[index * 4..index * 4 + 4].try_into().unwrap())
}

fn write_int(bytes: &mut [u8], index: usize, value: i32) {
    bytes[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
fn decode_ints(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
fn encode_ints_into(ints: &[i32], bytes: &mut [u8]) {
    for (chunk, &value) in bytes.chunks_exact_mut(4).zip(ints) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

/// C6: sort a resident file's payload as 32-bit integers, in place.
///
/// Files small enough to fit in [`RAM_BUDGET`] are read whole, sorted, and
/// written back. Larger files go through an external merge: sorted runs are
/// generated in [`MAX_INTS_IN_MEMORY`]-sized segments, then merged bottom-up
/// in doubling passes using a pagefile scratch file for the merged output.
pub fn sort<D: BlockDevice>(fs: &mut FileSystem<D>, name: &str) -> Result<(), Error> {
    let entry = fs.entry(name)?.clone();
    let num_ints = (entry.size_bytes / 4) as usize;
    info!(
        "sorting '{name}': {num_ints} integers ({} bytes)",
        entry.size_bytes
    );

    let mut buffer = HeapBuffer::allocate(RAM_BUDGET)?;

    if num_ints <= MAX_INTS_IN_MEMORY {
        debug!("'{name}' fits in memory, sorting directly");
        let n_bytes = num_ints * 4;
        let slice = &mut buffer.as_mut_slice()[..n_bytes];
        fs.raw_read(entry.start_offset, slice)?;
        bytemuck::cast_slice_mut::<u8, i32>(slice).sort_unstable();
        fs.raw_write(entry.start_offset, slice)?;
        return Ok(());
    }

    debug!("'{name}' exceeds the working set, using external merge sort");
    sort_external(fs, &entry, num_ints, &mut buffer)
}

fn sort_external<D: BlockDevice>(
    fs: &mut FileSystem<D>,
    entry: &crate::structs::FileEntry,
    num_ints: usize,
    buffer: &mut HeapBuffer,
) -> Result<(), Error> {
    let num_segments = num_ints.div_ceil(MAX_INTS_IN_MEMORY);
    debug!("phase A: generating {num_segments} sorted runs");
    for segment in 0..num_segments {
        let start = segment * MAX_INTS_IN_MEMORY;
        let end = ((segment + 1) * MAX_INTS_IN_MEMORY).min(num_ints);
        let segment_len = end - start;
        let byte_offset = entry.start_offset + start as u64 * 4;
        let n_bytes = segment_len * 4;
        let slice = &mut buffer.as_mut_slice()[..n_bytes];
        fs.raw_read(byte_offset, slice)?;
        bytemuck::cast_slice_mut::<u8, i32>(slice).sort_unstable();
        fs.raw_write(byte_offset, slice)?;
    }

    if fs.entry(PAGEFILE_NAME).is_ok() {
        warn!("stale pagefile found, deleting before new sort");
        fs.delete(PAGEFILE_NAME)?;
    }
    fs.create_sized(PAGEFILE_NAME, entry.size_bytes * 2)?;
    let pagefile_offset = fs.entry(PAGEFILE_NAME)?.start_offset;

    // Run the merge passes in a closure so the pagefile is always reclaimed
    // below, on both the success and error paths.
    let merge_result = (|| -> Result<(), Error> {
        let mut run_size = MAX_INTS_IN_MEMORY;
        while run_size < num_ints {
            debug!("phase B: merging runs of size {run_size}");
            let mut i = 0;
            while i < num_ints {
                let run1_start = i;
                let run1_end = (i + run_size).min(num_ints) - 1;
                if run1_end + 1 < num_ints {
                    let run2_start = run1_end + 1;
                    let run2_end = (run2_start + run_size).min(num_ints) - 1;
                    merge_runs(
                        fs,
                        entry.start_offset,
                        pagefile_offset,
                        run1_start,
                        run1_end,
                        run2_start,
                        run2_end,
                        buffer,
                    )?;
                }
                i += 2 * run_size;
            }
            run_size *= 2;
        }
        Ok(())
    })();

    let delete_result = fs.delete(PAGEFILE_NAME);
    merge_result.and(delete_result)
}

/// Merge the inclusive index ranges `[run1_start, run1_end]` and
/// `[run2_start, run2_end]` of the resident file at `file_offset`, using
/// `pagefile_offset` as scratch space for the merged output, then copy the
/// merged run back over the original two runs.
#[allow(clippy::too_many_arguments)]
fn merge_runs<D: BlockDevice>(
    fs: &mut FileSystem<D>,
    file_offset: u64,
    pagefile_offset: u64,
    run1_start: usize,
    run1_end: usize,
    run2_start: usize,
    run2_end: usize,
    buffer: &mut HeapBuffer,
) -> Result<(), Error> {
    let merged_size = (run1_end - run1_start + 1) + (run2_end - run2_start + 1);

    let (buf1_bytes, rest) = buffer.as_mut_slice().split_at_mut(BUFFER_WINDOW_INTS * 4);
    let (buf2_bytes, rest) = rest.split_at_mut(BUFFER_WINDOW_INTS * 4);
    let out_bytes = &mut rest[..OUT_WINDOW_INTS * 4];

    let mut pos1 = run1_start;
    let mut pos2 = run2_start;

    let mut buf1_len = refill(fs, file_offset, &mut pos1, run1_end, buf1_bytes)?;
    let mut buf2_len = refill(fs, file_offset, &mut pos2, run2_end, buf2_bytes)?;
    let mut buf1_pos = 0usize;
    let mut buf2_pos = 0usize;
    let mut output_count = 0usize;
    let mut output_pos = 0usize;

    while buf1_pos < buf1_len || buf2_pos < buf2_len {
        let take_from_1 = buf1_pos < buf1_len
            && (buf2_pos >= buf2_len || read_int(buf1_bytes, buf1_pos) <= read_int(buf2_bytes, buf2_pos));
        let value = if take_from_1 {
            let value = read_int(buf1_bytes, buf1_pos);
            buf1_pos += 1;
            value
        } else {
            let value = read_int(buf2_bytes, buf2_pos);
            buf2_pos += 1;
            value
        };
        write_int(out_bytes, output_count, value);
        output_count += 1;

        if output_count == OUT_WINDOW_INTS {
            fs.raw_write(
                pagefile_offset + output_pos as u64 * 4,
                &out_bytes[..output_count * 4],
            )?;
            output_pos += output_count;
            output_count = 0;
        }

        if buf1_pos == buf1_len {
            buf1_len = refill(fs, file_offset, &mut pos1, run1_end, buf1_bytes)?;
            buf1_pos = 0;
        }
        if buf2_pos == buf2_len {
            buf2_len = refill(fs, file_offset, &mut pos2, run2_end, buf2_bytes)?;
            buf2_pos = 0;
        }
    }

    if output_count > 0 {
        fs.raw_write(
            pagefile_offset + output_pos as u64 * 4,
            &out_bytes[..output_count * 4],
        )?;
    }

    let mut total_written = 0usize;
    let mut read_pos = 0usize;
    while total_written < merged_size {
        let to_read = (merged_size - total_written).min(OUT_WINDOW_INTS);
        fs.raw_read(
            pagefile_offset + read_pos as u64 * 4,
            &mut out_bytes[..to_read * 4],
        )?;
        fs.raw_write(
            file_offset + (run1_start + total_written) as u64 * 4,
            &out_bytes[..to_read * 4],
        )?;
        total_written += to_read;
        read_pos += to_read;
    }
    Ok(())
}

/// Load up to one window's worth of ints starting at `*pos` up to and
/// including `end`, advancing `*pos` past what was read.
fn refill<D: BlockDevice>(
    fs: &FileSystem<D>,
    file_offset: u64,
    pos: &mut usize,
    end: usize,
    window_bytes: &mut [u8],
) -> Result<usize, Error> {
    if *pos > end {
        return Ok(0);
    }
    let window_ints = window_bytes.len() / 4;
    let remaining = end - *pos + 1;
    let read_len = remaining.min(window_ints);
    fs.raw_read(file_offset + *pos as u64 * 4, &mut window_bytes[..read_len * 4])?;
    *pos += read_len;
    Ok(read_len)
}
