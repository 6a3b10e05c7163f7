use std::path::{Path, PathBuf};

use log::debug;

use crate::{
    byte_source::ByteSource,
    container::{Container, Entry, EntryIter, FieldWarning, Warnings},
    error::{Error, FormatError, Result},
    gcm::{
        ApploaderHeader, DiskHeader, DiskHeaderInformation, DolHeader, FstEntry, FstEntryKind,
        APPLOADER_HEADER_SIZE, APPLOADER_OFFSET, DISK_HEADER_INFORMATION_OFFSET,
        DISK_HEADER_INFORMATION_SIZE, DISK_HEADER_OFFSET, DISK_HEADER_SIZE, DOL_HEADER_SIZE,
        DVD_MAGIC,
    },
};

/// Directory under which the system area is listed.
pub const SYSTEM_DIRECTORY: &str = "sys";

/// The File System Table as read from disc.
#[derive(Debug, Clone)]
pub struct Fst {
    bytes: Vec<u8>,
    num_entries: u32,
}
impl Fst {
    /// Validates the root entry and the table bounds.
    pub fn read(bytes: Vec<u8>) -> std::result::Result<Self, FormatError> {
        let fst_size = bytes.len() as u32;
        if bytes.len() < FstEntry::size() {
            return Err(FormatError::FstTooSmall {
                num_entries: 0,
                fst_size,
            });
        }
        let root = FstEntry::read(&bytes[..FstEntry::size()]);
        if root.flag != 1 {
            return Err(FormatError::InvalidFstFlag {
                index: 0,
                flag: root.flag,
            });
        }
        let num_entries = root.second;
        if u64::from(num_entries) * FstEntry::size() as u64 > bytes.len() as u64 {
            return Err(FormatError::FstTooSmall {
                num_entries,
                fst_size,
            });
        }
        Ok(Fst { bytes, num_entries })
    }

    /// Entry count, root included.
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `index` must be below [`Fst::num_entries`].
    pub fn entry(&self, index: u32) -> FstEntry {
        let start = index as usize * FstEntry::size();
        FstEntry::read(&self.bytes[start..start + FstEntry::size()])
    }

    fn string_table(&self) -> &[u8] {
        &self.bytes[self.num_entries as usize * FstEntry::size()..]
    }

    /// The NUL-terminated name of an entry, as raw bytes.
    pub fn name(&self, index: u32, entry: &FstEntry) -> std::result::Result<&[u8], FormatError> {
        let table = self.string_table();
        let name_offset = entry.name_offset();
        let rest = table
            .get(name_offset as usize..)
            .filter(|rest| !rest.is_empty())
            .ok_or(FormatError::FstNameOutOfBounds { index, name_offset })?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        Ok(&rest[..end])
    }
}

/// GameCube disc decoder over a byte source.
///
/// The disk header and header information are read when the decoder is created; the apploader
/// and FST are read on first use and cached.
pub struct GcmFs<S: ByteSource> {
    source: S,
    path: Option<PathBuf>,
    image_size: u64,
    disk_header: DiskHeader,
    disk_header_information: DiskHeaderInformation,
    apploader_header: Option<ApploaderHeader>,
    apploader: Option<Vec<u8>>,
    fst: Option<Fst>,
    main_dol_size: Option<u64>,
    system_files: bool,
    warnings: Warnings,
    iterating: bool,
}

fn read_header_region<S: ByteSource>(source: &mut S, offset: u64, length: usize) -> Result<Vec<u8>> {
    source
        .read_at(offset, length as u64, true)
        .map_err(|e| match e {
            Error::TruncatedRead { .. } => FormatError::InvalidGcmHeader.into(),
            e => e,
        })
}

impl<S: ByteSource> GcmFs<S> {
    pub fn new(mut source: S, path: Option<PathBuf>) -> Result<Self> {
        let image_size = source.size()?;
        let header_bytes = read_header_region(&mut source, DISK_HEADER_OFFSET, DISK_HEADER_SIZE)?;
        let disk_header = DiskHeader::read(&header_bytes);
        let information_bytes = read_header_region(
            &mut source,
            DISK_HEADER_INFORMATION_OFFSET,
            DISK_HEADER_INFORMATION_SIZE,
        )?;
        let disk_header_information = DiskHeaderInformation::read(&information_bytes);
        debug!(
            "GcmFs::new: {} {:?}, FST {} bytes at {:#x}",
            disk_header.game_id(),
            disk_header.game_name,
            disk_header.fst_size,
            disk_header.fst_offset
        );

        let mut warnings = Warnings::default();
        if !disk_header.has_dvd_magic() {
            warnings.push(
                "disk header: dvd magic",
                format!(
                    "found {:#010x}, expected {:#010x}",
                    disk_header.dvd_magic, DVD_MAGIC
                ),
            );
        }
        let mut found = Vec::new();
        disk_header
            .game_name
            .check(&mut found, "disk header", "game name");
        warnings.extend(found);

        Ok(GcmFs {
            source,
            path,
            image_size,
            disk_header,
            disk_header_information,
            apploader_header: None,
            apploader: None,
            fst: None,
            main_dol_size: None,
            system_files: false,
            warnings,
            iterating: false,
        })
    }

    /// Also list the system area (boot.bin, bi2.bin, apploader.img, main.dol, fst.bin) under `sys/`.
    pub fn with_system_files(mut self, system_files: bool) -> Self {
        self.system_files = system_files;
        self
    }

    pub fn disk_header(&self) -> &DiskHeader {
        &self.disk_header
    }

    pub fn disk_header_information(&self) -> &DiskHeaderInformation {
        &self.disk_header_information
    }

    pub fn apploader_header(&mut self) -> Result<&ApploaderHeader> {
        if self.apploader_header.is_none() {
            let bytes = self
                .source
                .read_at(APPLOADER_OFFSET, APPLOADER_HEADER_SIZE as u64, true)?;
            self.apploader_header = Some(ApploaderHeader::read(&bytes));
        }
        self.apploader_header
            .as_ref()
            .ok_or_else(|| FormatError::InvalidGcmHeader.into())
    }

    /// The apploader: `size` bytes (from its header) starting at the apploader offset.
    pub fn apploader(&mut self) -> Result<&[u8]> {
        if self.apploader.is_none() {
            let header = self.apploader_header()?;
            debug!("apploader: {:?}, {} bytes", header.date, header.size);
            let size = u64::from(header.size);
            let bytes = self.source.read_at(APPLOADER_OFFSET, size, true)?;
            self.apploader = Some(bytes);
        }
        Ok(self.apploader.as_deref().unwrap_or_default())
    }

    pub fn fst(&mut self) -> Result<&Fst> {
        if self.fst.is_none() {
            let bytes = self.source.read_at(
                u64::from(self.disk_header.fst_offset),
                u64::from(self.disk_header.fst_size),
                true,
            )?;
            let fst = Fst::read(bytes)?;
            debug!("fst: {} entries", fst.num_entries());
            self.fst = Some(fst);
        }
        self.fst
            .as_ref()
            .ok_or_else(|| FormatError::InvalidGcmHeader.into())
    }

    /// main.dol, sized from its section table. The header is read once.
    pub fn main_dol(&mut self) -> Result<Vec<u8>> {
        let offset = u64::from(self.disk_header.main_dol_offset);
        let size = match self.main_dol_size {
            Some(size) => size,
            None => {
                let header = self.source.read_at(offset, DOL_HEADER_SIZE as u64, true)?;
                let size = DolHeader::read(&header).file_size();
                debug!("main_dol: {} bytes at {:#x}", size, offset);
                self.main_dol_size = Some(size);
                size
            }
        };
        self.source.read_at(offset, size, true)
    }
}

impl<S: ByteSource> Container for GcmFs<S> {
    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn entries(&mut self) -> Result<EntryIter<'_>> {
        if self.iterating {
            return Err(Error::ReentrantIteration);
        }
        let num_entries = self.fst()?.num_entries();
        let start_position = self.source.tell()?;
        let system_files = if self.system_files {
            SYSTEM_FILES.iter()
        } else {
            SYSTEM_FILES[..0].iter()
        };
        self.iterating = true;
        Ok(Box::new(GcmEntries {
            fs: self,
            start_position,
            system_files,
            index: 1,
            num_entries,
            stack: vec![OpenDirectory {
                path: String::new(),
                index: 0,
                end: num_entries,
            }],
            done: false,
        }))
    }

    fn warnings(&self) -> &[FieldWarning] {
        self.warnings.as_slice()
    }
}

#[derive(Debug, Clone, Copy)]
enum SystemFile {
    Directory,
    Boot,
    HeaderInformation,
    Apploader,
    MainDol,
    Fst,
}

static SYSTEM_FILES: [SystemFile; 6] = [
    SystemFile::Directory,
    SystemFile::Boot,
    SystemFile::HeaderInformation,
    SystemFile::Apploader,
    SystemFile::MainDol,
    SystemFile::Fst,
];

/// A directory whose children are still being scanned.
struct OpenDirectory {
    path: String,
    index: u32,
    /// Index of the first entry past this directory's subtree.
    end: u32,
}

/// Walks the FST in index order, one entry per call to `next`.
pub struct GcmEntries<'a, S: ByteSource> {
    fs: &'a mut GcmFs<S>,
    start_position: u64,
    system_files: std::slice::Iter<'static, SystemFile>,
    index: u32,
    num_entries: u32,
    stack: Vec<OpenDirectory>,
    done: bool,
}

impl<S: ByteSource> GcmEntries<'_, S> {
    fn system_entry(&mut self, file: SystemFile) -> Result<Entry> {
        let (name, payload) = match file {
            SystemFile::Directory => {
                return Ok(Entry::directory(SYSTEM_DIRECTORY.to_string(), None));
            }
            SystemFile::Boot => (
                "boot.bin",
                self.fs
                    .source
                    .read_at(DISK_HEADER_OFFSET, DISK_HEADER_SIZE as u64, false)?,
            ),
            SystemFile::HeaderInformation => (
                "bi2.bin",
                self.fs.source.read_at(
                    DISK_HEADER_INFORMATION_OFFSET,
                    DISK_HEADER_INFORMATION_SIZE as u64,
                    false,
                )?,
            ),
            SystemFile::Apploader => ("apploader.img", self.fs.apploader()?.to_vec()),
            SystemFile::MainDol => ("main.dol", self.fs.main_dol()?),
            SystemFile::Fst => ("fst.bin", self.fs.fst()?.as_bytes().to_vec()),
        };
        Ok(Entry::file(
            format!("{}/{}", SYSTEM_DIRECTORY, name),
            None,
            payload,
        ))
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        if let Some(&file) = self.system_files.next() {
            return self.system_entry(file).map(Some);
        }
        let index = self.index;
        if index >= self.num_entries {
            return Ok(None);
        }
        while self.stack.last().is_some_and(|top| top.end == index) {
            if let Some(closed) = self.stack.pop() {
                debug!("advance: close directory {:?} at {}", closed.path, index);
            }
        }
        let (entry, name) = {
            let fst = self.fs.fst()?;
            let entry = fst.entry(index);
            let name = fst.name(index, &entry)?;
            (entry, name.to_vec())
        };
        let name = match String::from_utf8(name) {
            Ok(name) => name,
            Err(e) => {
                self.fs.warnings.push(
                    format!("FST entry {}: name", index),
                    "not valid text, invalid bytes replaced",
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        let (parent_path, parent_index, limit) = match self.stack.last() {
            Some(top) => (top.path.as_str(), top.index, top.end),
            None => ("", 0, self.num_entries),
        };
        let path = if parent_path.is_empty() {
            name
        } else {
            format!("{}/{}", parent_path, name)
        };

        match entry.kind() {
            None => Err(FormatError::InvalidFstFlag {
                index,
                flag: entry.flag,
            }
            .into()),
            Some(FstEntryKind::Directory { parent, next }) => {
                if next <= index || next > limit {
                    return Err(FormatError::InvalidDirectoryEnd {
                        index,
                        next_index: next,
                        limit,
                    }
                    .into());
                }
                if parent != parent_index {
                    self.fs.warnings.push(
                        format!("FST entry {}: parent", index),
                        format!(
                            "records parent {} but lies inside directory {}",
                            parent, parent_index
                        ),
                    );
                }
                debug!("advance: open directory {:?} ({}..{})", path, index, next);
                self.stack.push(OpenDirectory {
                    path: path.clone(),
                    index,
                    end: next,
                });
                self.index += 1;
                Ok(Some(Entry::directory(path, None)))
            }
            Some(FstEntryKind::File { offset, length }) => {
                let (offset, length) = (u64::from(offset), u64::from(length));
                if offset + length > self.fs.image_size {
                    return Err(FormatError::FileOutOfBounds {
                        index,
                        offset,
                        length,
                        image_size: self.fs.image_size,
                    }
                    .into());
                }
                let payload = self.fs.source.read_at(offset, length, false)?;
                self.index += 1;
                Ok(Some(Entry::file(path, None, payload)))
            }
        }
    }
}

impl<S: ByteSource> Iterator for GcmEntries<'_, S> {
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

impl<S: ByteSource> Drop for GcmEntries<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.fs.source.seek_to(self.start_position) {
            debug!("GcmEntries::drop: could not restore position: {}", e);
        }
        self.fs.iterating = false;
    }
}
