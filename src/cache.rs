use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use log::debug;
use lru::LruCache;

/// Block size used when none is given; one optical-disc sector.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Number of blocks kept when no capacity is given (1 MiB with the default block size).
pub const DEFAULT_CAPACITY: usize = 512;

/// An LRU cache of fixed-size blocks in front of a slow `Read + Seek`.
///
/// The cache is itself `Read + Seek`, so it can stand in for the wrapped reader anywhere a
/// [`ByteSource`](crate::ByteSource) is expected. Decoders revisit the same few sectors (volume
/// descriptors, directory extents) often, which is where this pays off for sources with expensive
/// seeks such as decompressing readers.
pub struct BlockCache<R: Read + Seek> {
    /// Slot `i` occupies `data[i * block_size..(i + 1) * block_size]`.
    data: Vec<u8>,
    /// Valid bytes per slot; only the last block of the source is short.
    slot_lengths: Vec<usize>,
    /// block number -> slot
    lru_cache: LruCache<u64, usize>,
    empty_slots: Vec<usize>,
    block_size: usize,
    position: u64,
    length: Option<u64>,
    reader: R,
}
impl<R: Read + Seek> BlockCache<R> {
    /// Create a new cache with the default block size and capacity.
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_CAPACITY)
    }

    /// Create a new cache holding up to `blocks` blocks of [`DEFAULT_BLOCK_SIZE`] bytes.
    pub fn with_capacity(reader: R, blocks: usize) -> Self {
        Self::with_block_size(reader, DEFAULT_BLOCK_SIZE, blocks)
    }

    pub fn with_block_size(reader: R, block_size: usize, blocks: usize) -> Self {
        let block_size = block_size.max(1);
        let blocks = blocks.max(1);
        BlockCache {
            data: vec![0; block_size * blocks],
            slot_lengths: vec![0; blocks],
            lru_cache: LruCache::new(NonZeroUsize::new(blocks).unwrap_or(NonZeroUsize::MIN)),
            empty_slots: (0..blocks).rev().collect(),
            block_size,
            position: 0,
            length: None,
            reader,
        }
    }

    fn ensure_empty_slot(&mut self) -> usize {
        if let Some(slot) = self.empty_slots.pop() {
            slot
        } else {
            // no free slot means the cache is at capacity, so there is something to evict
            self.lru_cache.pop_lru().map(|(_old_block, slot)| slot).unwrap_or(0)
        }
    }

    /// Returns the cached contents of `block`, reading it in on a miss.
    ///
    /// The slice is shorter than the block size only at the end of the source.
    pub fn read_block(&mut self, block: u64) -> io::Result<&[u8]> {
        if let Some(&slot) = self.lru_cache.get(&block) {
            let start = slot * self.block_size;
            return Ok(&self.data[start..start + self.slot_lengths[slot]]);
        }
        let slot = self.ensure_empty_slot();
        let start = slot * self.block_size;
        let buf = &mut self.data[start..start + self.block_size];
        match read_block_into(&mut self.reader, block * self.block_size as u64, buf) {
            Ok(len) => {
                debug!("read_block: block {} -> slot {} ({} bytes)", block, slot, len);
                self.slot_lengths[slot] = len;
                self.lru_cache.put(block, slot);
                Ok(&self.data[start..start + len])
            }
            Err(e) => {
                self.empty_slots.push(slot);
                Err(e)
            }
        }
    }

    fn len(&mut self) -> io::Result<u64> {
        if let Some(length) = self.length {
            return Ok(length);
        }
        let current = self.reader.stream_position()?;
        let length = self.reader.seek(SeekFrom::End(0))?;
        self.reader.seek(SeekFrom::Start(current))?;
        self.length = Some(length);
        Ok(length)
    }
}

fn read_block_into<R: Read + Seek>(reader: &mut R, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
    reader.seek(SeekFrom::Start(pos))?;
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf[filled..].fill(0);
    Ok(filled)
}

impl<R: Read + Seek> Read for BlockCache<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block_size = self.block_size as u64;
        let block = self.position / block_size;
        let offset = (self.position % block_size) as usize;
        let data = self.read_block(block)?;
        if offset >= data.len() {
            // at or past the end of the source
            return Ok(0);
        }
        let len = (data.len() - offset).min(buf.len());
        buf[..len].copy_from_slice(&data[offset..offset + len]);
        self.position += len as u64;
        Ok(len)
    }
}

impl<R: Read + Seek> Seek for BlockCache<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_position = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len()?.checked_add_signed(delta),
        };
        match new_position {
            Some(p) => {
                self.position = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use crate::byte_source::ByteSource;

    /// Counts how often the wrapped reader is actually asked for data.
    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        reads: usize,
    }
    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            self.inner.read(buf)
        }
    }
    impl Seek for CountingReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_reads_match_underlying_data() {
        let data = numbered(10_000);
        let mut cache = BlockCache::with_block_size(Cursor::new(data.clone()), 512, 4);
        let got = cache.read_at(1000, 3000, false).unwrap();
        assert_eq!(got, &data[1000..4000]);
        let got = cache.read_at(0, 10, true).unwrap();
        assert_eq!(got, &data[0..10]);
        assert_eq!(cache.tell().unwrap(), 4000);
    }

    #[test]
    fn test_short_last_block() {
        let data = numbered(1000);
        let mut cache = BlockCache::with_block_size(Cursor::new(data.clone()), 512, 2);
        assert_eq!(cache.read_at(900, 100, false).unwrap(), &data[900..]);
        assert!(matches!(
            cache.read_at(900, 101, false),
            Err(crate::Error::TruncatedRead { available: 100, .. })
        ));
        assert_eq!(cache.size().unwrap(), 1000);
    }

    #[test]
    fn test_hits_do_not_touch_reader() {
        let reader = CountingReader {
            inner: Cursor::new(numbered(4096)),
            reads: 0,
        };
        let mut cache = BlockCache::with_block_size(reader, 1024, 2);
        cache.read_at(0, 100, false).unwrap();
        let reads_after_miss = cache.reader.reads;
        cache.read_at(10, 200, false).unwrap();
        cache.read_at(500, 24, false).unwrap();
        assert_eq!(cache.reader.reads, reads_after_miss);
    }

    #[test]
    fn test_eviction() {
        let data = numbered(8192);
        let reader = CountingReader {
            inner: Cursor::new(data.clone()),
            reads: 0,
        };
        let mut cache = BlockCache::with_block_size(reader, 1024, 2);
        for block in 0..8u64 {
            let got = cache.read_at(block * 1024, 1024, false).unwrap();
            assert_eq!(got, &data[block as usize * 1024..(block as usize + 1) * 1024]);
        }
        assert_eq!(cache.lru_cache.len(), 2);
        // block 0 was evicted long ago and must be fetched again
        let before = cache.reader.reads;
        cache.read_at(0, 1, false).unwrap();
        assert!(cache.reader.reads > before);
    }

    #[test]
    fn test_seek_variants() {
        let mut cache = BlockCache::new(Cursor::new(numbered(100)));
        assert_eq!(cache.seek(SeekFrom::End(-10)).unwrap(), 90);
        assert_eq!(cache.seek(SeekFrom::Current(5)).unwrap(), 95);
        assert!(cache.seek(SeekFrom::Current(-200)).is_err());
        assert_eq!(cache.seek(SeekFrom::Start(7)).unwrap(), 7);
    }
}
