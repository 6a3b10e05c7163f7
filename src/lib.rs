//! Read-only decoding of ISO 9660 and GameCube (GCM) disc images.
//!
//! A decoder wraps any seekable [`ByteSource`] and yields its contents one [`Entry`] at a time
//! through the [`Container`] trait, reading headers, tables and file payloads on demand.

pub mod byte_source;
pub mod cache;
pub mod container;
pub mod error;
pub mod format;
pub mod gcm;
pub mod gcm_parser;
pub mod iso9660;
pub mod iso9660_parser;
pub mod timestamp;

#[cfg(test)]
mod test_images;

pub use byte_source::ByteSource;
pub use cache::BlockCache;
pub use container::{collect_sorted, sort_by_path, strip_version_suffix, Container, Entry, FieldWarning};
pub use error::{Error, FormatError, Result};
pub use format::{detect_format, open_container, ContainerFormat};
pub use gcm_parser::GcmFs;
pub use iso9660_parser::IsoFs;
pub use timestamp::Timestamp;
