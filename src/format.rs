use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::debug;

use crate::{
    byte_source::ByteSource,
    container::Container,
    error::{FormatError, Result},
    gcm::DVD_MAGIC,
    gcm_parser::GcmFs,
    iso9660_parser::{find_sector_size, IsoFs, MAGIC_SEARCH_LIMIT},
};

/// Offset of the DVD magic word in a GameCube disk header.
const DVD_MAGIC_OFFSET: usize = 0x1C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    Iso9660,
    Gcm,
}

impl FromStr for ContainerFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ISO" | "ISO9660" => Ok(ContainerFormat::Iso9660),
            "GCM" => Ok(ContainerFormat::Gcm),
            _ => Err(FormatError::UnknownFormat),
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerFormat::Iso9660 => f.write_str("ISO"),
            ContainerFormat::Gcm => f.write_str("GCM"),
        }
    }
}

/// Guesses the format from the start of the image. Leaves the cursor where it was.
pub fn detect_format<S: ByteSource>(source: &mut S) -> Result<ContainerFormat> {
    let length = source.size()?.min(MAGIC_SEARCH_LIMIT);
    let head = source.read_at(0, length, true)?;
    if let Some(sector_size) = find_sector_size(&head) {
        debug!("detect_format: ISO 9660 with {} byte sectors", sector_size);
        return Ok(ContainerFormat::Iso9660);
    }
    if let Some(magic) = head.get(DVD_MAGIC_OFFSET..DVD_MAGIC_OFFSET + 4) {
        if magic == DVD_MAGIC.to_be_bytes() {
            debug!("detect_format: GameCube disc");
            return Ok(ContainerFormat::Gcm);
        }
    }
    Err(FormatError::UnknownFormat.into())
}

/// Creates the decoder for `format`, checking the image's mandatory structures.
pub fn open_container<'a, S: ByteSource + 'a>(
    format: ContainerFormat,
    source: S,
    path: Option<PathBuf>,
) -> Result<Box<dyn Container + 'a>> {
    let container: Box<dyn Container + 'a> = match format {
        ContainerFormat::Iso9660 => Box::new(IsoFs::open(source, path)?),
        ContainerFormat::Gcm => Box::new(GcmFs::new(source, path)?),
    };
    Ok(container)
}
