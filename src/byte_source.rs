use std::io::{Read, Seek, SeekFrom};

use log::debug;

use crate::error::{Error, Result};

/// Upper bound on how much buffer is reserved up front for one read.
///
/// Lengths come straight out of image metadata, so the buffer grows as bytes actually arrive
/// instead of trusting a declared 4 GiB extent.
const MAX_PREALLOCATION: u64 = 1024 * 1024;

/// A seekable, randomly addressable sequence of bytes that a container is decoded from.
///
/// The cursor is shared mutable state without synchronization: exactly one read or iteration may
/// be in flight per source at any time.
pub trait ByteSource {
    /// Reads exactly `length` bytes starting at `offset`.
    ///
    /// With `restore_position` the cursor is put back where it was before the call, also when the
    /// read fails. Without it the cursor is left wherever the read ended, which saves a seek when
    /// the caller repositions anyway.
    fn read_at(&mut self, offset: u64, length: u64, restore_position: bool) -> Result<Vec<u8>>;

    /// Current cursor position.
    fn tell(&mut self) -> Result<u64>;

    /// Moves the cursor to an absolute position.
    fn seek_to(&mut self, position: u64) -> Result<()>;

    /// Total number of bytes in the source. Leaves the cursor untouched.
    fn size(&mut self) -> Result<u64>;
}

impl<R: Read + Seek> ByteSource for R {
    fn read_at(&mut self, offset: u64, length: u64, restore_position: bool) -> Result<Vec<u8>> {
        let start = if restore_position {
            Some(self.stream_position()?)
        } else {
            None
        };
        let result = read_exact_at(self, offset, length);
        if let Some(start) = start {
            self.seek(SeekFrom::Start(start))?;
        }
        result
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        let current = self.stream_position()?;
        let size = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(size)
    }
}

fn read_exact_at<R: Read + Seek>(reader: &mut R, offset: u64, length: u64) -> Result<Vec<u8>> {
    debug!("read_exact_at: offset={}, length={}", offset, length);
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(length.min(MAX_PREALLOCATION) as usize);
    let available = reader.by_ref().take(length).read_to_end(&mut buf)? as u64;
    if available < length {
        debug!(
            "read_exact_at: truncated, wanted {} bytes at {} but got {}",
            length, offset, available
        );
        return Err(Error::TruncatedRead {
            offset,
            length,
            available,
        });
    }
    Ok(buf)
}

/// Byte offset of a logical block.
pub fn block_to_offset(block: u32, block_size: u64) -> u64 {
    u64::from(block) * block_size
}
