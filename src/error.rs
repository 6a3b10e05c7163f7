use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    #[error("Truncated read: wanted {length} bytes at offset {offset}, only {available} available")]
    TruncatedRead {
        offset: u64,
        length: u64,
        available: u64,
    },
    #[error("An iteration over this container is already in flight")]
    ReentrantIteration,
}

/// Structural problems that make an image (or the current decode step) unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("magic word not found")]
    MagicNotFound,
    #[error("missing terminator: image ends at volume descriptor sector {sector}")]
    MissingTerminator { sector: u64 },
    #[error("no primary volume descriptor in the descriptor set")]
    MissingPrimaryVolumeDescriptor,
    #[error("volume descriptor at sector {sector} is only {length} bytes long")]
    DescriptorTooShort { sector: u64, length: usize },
    #[error("root directory record could not be parsed")]
    InvalidRootDirectoryRecord,
    #[error("invalid GCM disk header")]
    InvalidGcmHeader,
    #[error("invalid flag byte {flag} in FST entry {index}")]
    InvalidFstFlag { index: u32, flag: u8 },
    #[error("FST of {fst_size} bytes cannot hold {num_entries} entries")]
    FstTooSmall { num_entries: u32, fst_size: u32 },
    #[error("name of FST entry {index} starts outside the string table (offset {name_offset})")]
    FstNameOutOfBounds { index: u32, name_offset: u32 },
    #[error("FST directory {index} ends at entry {next_index}, outside its parent (limit {limit})")]
    InvalidDirectoryEnd {
        index: u32,
        next_index: u32,
        limit: u32,
    },
    #[error("FST file {index} ({length} bytes at {offset}) lies past the image end ({image_size})")]
    FileOutOfBounds {
        index: u32,
        offset: u64,
        length: u64,
        image_size: u64,
    },
    #[error("unknown container format")]
    UnknownFormat,
}

pub type Result<T> = std::result::Result<T, Error>;
