use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::debug;

use crate::{
    byte_source::{block_to_offset, ByteSource},
    container::{Container, Entry, EntryIter, FieldWarning, Warnings},
    error::{Error, FormatError, Result},
    iso9660::{
        DescriptorType, DirectoryRecord, PrimaryVolumeDescriptor, VolumeDescriptor,
        PRIMARY_VOLUME_DESCRIPTOR_LENGTH, STANDARD_IDENTIFIER, VOLUME_DESCRIPTOR_SET_START,
    },
};

/// How far into the image the standard identifier is searched for.
pub const MAGIC_SEARCH_LIMIT: u64 = 50_000;

/// Smallest prefix a descriptor needs for its type, identifier and version.
const DESCRIPTOR_HEADER_LENGTH: usize = 7;

/// Finds the sector size from the position of the first volume descriptor's identifier.
///
/// The identifier sits at byte 1 of sector 16, so its offset `o` gives `(o - 1) / 16`.
pub fn find_sector_size(bytes: &[u8]) -> Option<u64> {
    bytes
        .windows(STANDARD_IDENTIFIER.len())
        .enumerate()
        .filter(|(offset, _)| *offset > 1 && (offset - 1) % 16 == 0)
        .find(|(_, window)| *window == STANDARD_IDENTIFIER)
        .map(|(offset, _)| (offset as u64 - 1) / 16)
}

/// ISO 9660 decoder over a byte source.
///
/// Descriptors are read on first use and cached; the directory tree is walked lazily by
/// [`Container::entries`].
pub struct IsoFs<S: ByteSource> {
    source: S,
    path: Option<PathBuf>,
    sector_size: Option<u64>,
    volume_descriptors: Option<Vec<VolumeDescriptor>>,
    primary_volume_descriptor: Option<PrimaryVolumeDescriptor>,
    warnings: Warnings,
    iterating: bool,
}

impl<S: ByteSource> IsoFs<S> {
    pub fn new(source: S, path: Option<PathBuf>) -> Self {
        IsoFs {
            source,
            path,
            sector_size: None,
            volume_descriptors: None,
            primary_volume_descriptor: None,
            warnings: Warnings::default(),
            iterating: false,
        }
    }

    /// Reads and validates the descriptor set up front so a bad image fails here instead of at
    /// the first walk.
    pub fn open(source: S, path: Option<PathBuf>) -> Result<Self> {
        let mut fs = Self::new(source, path);
        fs.primary_volume_descriptor()?;
        Ok(fs)
    }

    pub fn sector_size(&mut self) -> Result<u64> {
        if let Some(sector_size) = self.sector_size {
            return Ok(sector_size);
        }
        let length = self.source.size()?.min(MAGIC_SEARCH_LIMIT);
        let head = self.source.read_at(0, length, true)?;
        let sector_size = find_sector_size(&head).ok_or(FormatError::MagicNotFound)?;
        debug!("sector_size: {}", sector_size);
        self.sector_size = Some(sector_size);
        Ok(sector_size)
    }

    /// The volume descriptor set, from sector 16 up to and including the set terminator.
    pub fn volume_descriptors(&mut self) -> Result<&[VolumeDescriptor]> {
        if self.volume_descriptors.is_none() {
            let descriptors = self.read_volume_descriptors()?;
            self.volume_descriptors = Some(descriptors);
        }
        Ok(self.volume_descriptors.as_deref().unwrap_or_default())
    }

    fn read_volume_descriptors(&mut self) -> Result<Vec<VolumeDescriptor>> {
        let sector_size = self.sector_size()?;
        let image_size = self.source.size()?;
        let mut descriptors = Vec::new();
        let mut sector = VOLUME_DESCRIPTOR_SET_START;
        loop {
            let offset = sector * sector_size;
            let available = image_size.saturating_sub(offset);
            if available == 0 {
                return Err(FormatError::MissingTerminator { sector }.into());
            }
            if available < DESCRIPTOR_HEADER_LENGTH as u64 {
                return Err(FormatError::DescriptorTooShort {
                    sector,
                    length: available as usize,
                }
                .into());
            }
            let bytes = self
                .source
                .read_at(offset, available.min(sector_size), true)?;
            let descriptor = VolumeDescriptor::read(&bytes);
            debug!(
                "read_volume_descriptors: sector {} is {:?}",
                sector, descriptor.descriptor_type
            );
            if descriptor.standard_identifier != STANDARD_IDENTIFIER {
                self.warnings.push(
                    format!("volume descriptor at sector {}", sector),
                    format!(
                        "standard identifier is {:?}, expected \"CD001\"",
                        String::from_utf8_lossy(&descriptor.standard_identifier)
                    ),
                );
            }
            let is_terminator = descriptor.descriptor_type == DescriptorType::SetTerminator;
            descriptors.push(descriptor);
            if is_terminator {
                return Ok(descriptors);
            }
            sector += 1;
        }
    }

    pub fn primary_volume_descriptor(&mut self) -> Result<&PrimaryVolumeDescriptor> {
        if self.primary_volume_descriptor.is_none() {
            let pvd = self.read_primary_volume_descriptor()?;
            self.warnings.extend(pvd.field_warnings());
            self.primary_volume_descriptor = Some(pvd);
        }
        self.primary_volume_descriptor
            .as_ref()
            .ok_or_else(|| FormatError::MissingPrimaryVolumeDescriptor.into())
    }

    fn read_primary_volume_descriptor(&mut self) -> Result<PrimaryVolumeDescriptor> {
        let descriptors = self.volume_descriptors()?;
        let (index, descriptor) = descriptors
            .iter()
            .enumerate()
            .find(|(_, d)| d.descriptor_type == DescriptorType::PrimaryVolumeDescriptor)
            .ok_or(FormatError::MissingPrimaryVolumeDescriptor)?;
        if descriptor.data.len() < PRIMARY_VOLUME_DESCRIPTOR_LENGTH {
            return Err(FormatError::DescriptorTooShort {
                sector: VOLUME_DESCRIPTOR_SET_START + index as u64,
                length: descriptor.data.len(),
            }
            .into());
        }
        let pvd = PrimaryVolumeDescriptor::read(&descriptor.data)?;
        debug!(
            "read_primary_volume_descriptor: volume {:?}, root at block {}",
            pvd.volume_identifier,
            pvd.root_directory_record.location()
        );
        Ok(pvd)
    }
}

impl<S: ByteSource> Container for IsoFs<S> {
    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn entries(&mut self) -> Result<EntryIter<'_>> {
        if self.iterating {
            return Err(Error::ReentrantIteration);
        }
        let sector_size = self.sector_size()?;
        let root = self.primary_volume_descriptor()?.root_directory_record.clone();
        let start_position = self.source.tell()?;
        self.iterating = true;
        Ok(Box::new(IsoEntries {
            fs: self,
            sector_size,
            start_position,
            visited: HashSet::from([root.location()]),
            stack: vec![(String::new(), root)],
            current: None,
            done: false,
        }))
    }

    fn warnings(&self) -> &[FieldWarning] {
        self.warnings.as_slice()
    }
}

/// A directory extent being scanned record by record.
struct DirectoryScan {
    path: String,
    data: Vec<u8>,
    offset: usize,
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Walks the directory tree one entry per call to `next`.
///
/// Directories wait on a stack and are popped last-in first-out, so siblings come out in reverse
/// order of discovery. Files are read as soon as their record is scanned.
pub struct IsoEntries<'a, S: ByteSource> {
    fs: &'a mut IsoFs<S>,
    sector_size: u64,
    start_position: u64,
    /// Extent locations of every directory queued so far.
    visited: HashSet<u32>,
    stack: Vec<(String, DirectoryRecord)>,
    current: Option<DirectoryScan>,
    done: bool,
}

impl<S: ByteSource> IsoEntries<'_, S> {
    fn read_extent(&mut self, record: &DirectoryRecord) -> Result<Vec<u8>> {
        let offset = block_to_offset(record.location(), self.sector_size);
        self.fs
            .source
            .read_at(offset, u64::from(record.data_length()), false)
    }

    /// Next record of the directory being scanned, or `None` once the extent is used up.
    fn next_record(&mut self) -> Option<(String, DirectoryRecord)> {
        let sector_size = self.sector_size as usize;
        let scan = self.current.as_mut()?;
        while scan.offset < scan.data.len() {
            if scan.data[scan.offset] == 0 {
                // no more records in this sector
                scan.offset = (scan.offset / sector_size + 1) * sector_size;
                continue;
            }
            let Some(record) = DirectoryRecord::read(&scan.data[scan.offset..]) else {
                let context = format!("directory {:?} at byte {}", scan.path, scan.offset);
                self.fs.warnings.push(
                    context,
                    "directory record overruns its extent, skipping the rest of the directory",
                );
                self.current = None;
                return None;
            };
            scan.offset += record.length as usize;
            if record.is_self_or_parent() {
                continue;
            }
            let path = join(&scan.path, &record.name());
            return Some((path, record));
        }
        debug!("next_record: finished directory {:?}", scan.path);
        self.current = None;
        None
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        loop {
            if self.current.is_some() {
                let Some((path, record)) = self.next_record() else {
                    continue;
                };
                self.fs.warnings.extend(record.field_warnings(&path));
                if record.is_directory() {
                    if !self.visited.insert(record.location()) {
                        self.fs.warnings.push(
                            path,
                            format!(
                                "directory extent at block {} is already listed, skipping it",
                                record.location()
                            ),
                        );
                        continue;
                    }
                    debug!("advance: push directory {:?}", path);
                    self.stack.push((path, record));
                    continue;
                }
                let payload = self.read_extent(&record)?;
                let timestamp = record.recording_timestamp.decode().timestamp();
                return Ok(Some(Entry::file(path, timestamp, payload)));
            }
            let Some((path, record)) = self.stack.pop() else {
                return Ok(None);
            };
            debug!("advance: pop directory {:?}", path);
            let data = self.read_extent(&record)?;
            self.current = Some(DirectoryScan {
                path: path.clone(),
                data,
                offset: 0,
            });
            if !path.is_empty() {
                let timestamp = record.recording_timestamp.decode().timestamp();
                return Ok(Some(Entry::directory(path, timestamp)));
            }
        }
    }
}

impl<S: ByteSource> Iterator for IsoEntries<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: ByteSource> Drop for IsoEntries<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.fs.source.seek_to(self.start_position) {
            debug!("IsoEntries::drop: could not restore position: {}", e);
        }
        self.fs.iterating = false;
    }
}
