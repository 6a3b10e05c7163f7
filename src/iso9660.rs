use std::fmt;

use static_assertions::assert_eq_size;

use crate::container::FieldWarning;
use crate::error::FormatError;
use crate::timestamp::{self, DecodedTimestamp};

/// ISO 9660 8.1.2 Standard Identifier, found at byte 1 of every volume descriptor.
pub const STANDARD_IDENTIFIER: [u8; 5] = *b"CD001";

/// Logical sectors 0 to 15 are the System Area; the descriptor set starts at sector 16.
pub const VOLUME_DESCRIPTOR_SET_START: u64 = 16;

/// Offset of the root directory record within the primary volume descriptor.
const ROOT_DIRECTORY_RECORD_OFFSET: usize = 156;

/// Length of the root directory record embedded in the primary volume descriptor.
pub const ROOT_DIRECTORY_RECORD_LENGTH: usize = 34;

/// Bytes of the primary volume descriptor that carry fields (through the application use area).
pub const PRIMARY_VOLUME_DESCRIPTOR_LENGTH: usize = 1395;

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut a = [0u8; N];
    a.copy_from_slice(&bytes[..N]);
    a
}

fn u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// ISO 9660 8.1.1 Volume Descriptor Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    BootRecord,
    PrimaryVolumeDescriptor,
    SupplementaryVolumeDescriptor,
    VolumePartitionDescriptor,
    SetTerminator,
    Other(u8),
}
impl From<u8> for DescriptorType {
    fn from(value: u8) -> Self {
        match value {
            0 => DescriptorType::BootRecord,
            1 => DescriptorType::PrimaryVolumeDescriptor,
            2 => DescriptorType::SupplementaryVolumeDescriptor,
            3 => DescriptorType::VolumePartitionDescriptor,
            255 => DescriptorType::SetTerminator,
            other => DescriptorType::Other(other),
        }
    }
}

/// The same value recorded twice, ISO 9660 7.2.3 (16 bit) and 7.3.3 (32 bit).
///
/// The little-endian copy is authoritative; the big-endian copy only serves as a check.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndianPair<T> {
    pub little_endian: T,
    pub big_endian: T,
}
impl<T: Copy + PartialEq> EndianPair<T> {
    pub fn value(&self) -> T {
        self.little_endian
    }

    pub fn is_consistent(&self) -> bool {
        self.little_endian == self.big_endian
    }
}
impl EndianPair<u16> {
    pub fn read_u16(bytes: &[u8]) -> Self {
        EndianPair {
            little_endian: u16_le(&bytes[0..2]),
            big_endian: u16_be(&bytes[2..4]),
        }
    }
}
impl EndianPair<u32> {
    pub fn read_u32(bytes: &[u8]) -> Self {
        EndianPair {
            little_endian: u32_le(&bytes[0..4]),
            big_endian: u32_be(&bytes[4..8]),
        }
    }
}

fn check_pair<T: Copy + PartialEq + fmt::Display>(
    warnings: &mut Vec<FieldWarning>,
    context: &str,
    field: &str,
    pair: &EndianPair<T>,
) {
    if !pair.is_consistent() {
        warnings.push(FieldWarning {
            context: format!("{}: {}", context, field),
            message: format!(
                "little-endian value {} disagrees with big-endian value {}, using {}",
                pair.little_endian, pair.big_endian, pair.little_endian
            ),
        });
    }
}

/// A string field: text when it decodes cleanly, otherwise the raw bytes.
///
/// Trailing NUL bytes and spaces are trimmed either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextField {
    Text(String),
    Raw(Vec<u8>),
}
impl TextField {
    pub fn decode(bytes: &[u8]) -> Self {
        let end = bytes
            .iter()
            .rposition(|&b| b != 0 && b != b' ')
            .map_or(0, |i| i + 1);
        let trimmed = &bytes[..end];
        match std::str::from_utf8(trimmed) {
            Ok(s) => TextField::Text(s.to_string()),
            Err(_) => TextField::Raw(trimmed.to_vec()),
        }
    }

    /// Decodes up to the first NUL byte.
    pub fn decode_nul_terminated(bytes: &[u8]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        TextField::decode(&bytes[..end])
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TextField::Text(s) => Some(s),
            TextField::Raw(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TextField::Text(s) => s.is_empty(),
            TextField::Raw(b) => b.is_empty(),
        }
    }

    pub(crate) fn check(&self, warnings: &mut Vec<FieldWarning>, context: &str, field: &str) {
        if let TextField::Raw(bytes) = self {
            warnings.push(FieldWarning {
                context: format!("{}: {}", context, field),
                message: format!("{} bytes are not valid text, kept raw", bytes.len()),
            });
        }
    }
}
impl Default for TextField {
    fn default() -> Self {
        TextField::Text(String::new())
    }
}
impl fmt::Display for TextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextField::Text(s) => f.write_str(s),
            TextField::Raw(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

/// ISO 9660 9.1.5 Recording Date and Time, as stored in directory records.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BinaryTimestamp {
    pub years_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Quarter hours counted from UTC-12.
    pub gmt_offset: u8,
}
assert_eq_size!(BinaryTimestamp, [u8; 7]);
impl BinaryTimestamp {
    pub fn size() -> usize {
        std::mem::size_of::<BinaryTimestamp>()
    }

    pub fn read(bytes: &[u8]) -> Self {
        BinaryTimestamp {
            years_since_1900: bytes[0],
            month: bytes[1],
            day: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
            second: bytes[5],
            gmt_offset: bytes[6],
        }
    }

    pub fn decode(&self) -> DecodedTimestamp {
        if *self == BinaryTimestamp::default() {
            return DecodedTimestamp::Unset;
        }
        timestamp::compose(
            1900 + i32::from(self.years_since_1900),
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            0,
            self.gmt_offset,
        )
    }
}

/// ISO 9660 8.4.26.1 date and time as ASCII digits, used by volume descriptors.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DigitTimestamp {
    pub year: [u8; 4],
    pub month: [u8; 2],
    pub day: [u8; 2],
    pub hour: [u8; 2],
    pub minute: [u8; 2],
    pub second: [u8; 2],
    pub centisecond: [u8; 2],
    /// Quarter hours counted from UTC-12.
    pub gmt_offset: u8,
}
assert_eq_size!(DigitTimestamp, [u8; 17]);
impl DigitTimestamp {
    pub fn size() -> usize {
        std::mem::size_of::<DigitTimestamp>()
    }

    pub fn read(bytes: &[u8]) -> Self {
        DigitTimestamp {
            year: array(&bytes[0..4]),
            month: array(&bytes[4..6]),
            day: array(&bytes[6..8]),
            hour: array(&bytes[8..10]),
            minute: array(&bytes[10..12]),
            second: array(&bytes[12..14]),
            centisecond: array(&bytes[14..16]),
            gmt_offset: bytes[16],
        }
    }

    fn digits(&self) -> impl Iterator<Item = u8> + '_ {
        self.year
            .iter()
            .chain(&self.month)
            .chain(&self.day)
            .chain(&self.hour)
            .chain(&self.minute)
            .chain(&self.second)
            .chain(&self.centisecond)
            .copied()
    }

    pub fn decode(&self) -> DecodedTimestamp {
        // "not specified" is all '0' digits with a zero offset; some mastering tools write NULs
        let unset = self.gmt_offset == 0 && self.digits().all(|b| b == b'0' || b == 0);
        if unset {
            return DecodedTimestamp::Unset;
        }
        let fields = (
            parse_digits(&self.year),
            parse_digits(&self.month),
            parse_digits(&self.day),
            parse_digits(&self.hour),
            parse_digits(&self.minute),
            parse_digits(&self.second),
            parse_digits(&self.centisecond),
        );
        match fields {
            (
                Some(year),
                Some(month),
                Some(day),
                Some(hour),
                Some(minute),
                Some(second),
                Some(centisecond),
            ) => timestamp::compose(
                year as i32,
                month as u8,
                day as u8,
                hour as u8,
                minute as u8,
                second as u8,
                centisecond as u8,
                self.gmt_offset,
            ),
            _ => DecodedTimestamp::Invalid(format!(
                "non-digit characters in {:?}",
                String::from_utf8_lossy(&self.digits().collect::<Vec<u8>>())
            )),
        }
    }
}

fn parse_digits(bytes: &[u8]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |acc, &b| {
        if b.is_ascii_digit() {
            Some(acc * 10 + u32::from(b - b'0'))
        } else {
            None
        }
    })
}

fn check_timestamp(
    warnings: &mut Vec<FieldWarning>,
    context: &str,
    field: &str,
    decoded: &DecodedTimestamp,
) {
    if let Some(message) = decoded.warning() {
        warnings.push(FieldWarning {
            context: format!("{}: {}", context, field),
            message,
        });
    }
}

/// ISO 9660 8.1 Volume Descriptor, kept as the raw sector.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub descriptor_type: DescriptorType,
    pub standard_identifier: [u8; 5],
    pub version: u8,
    pub data: Vec<u8>,
}
impl VolumeDescriptor {
    /// `bytes` must hold at least the 7-byte descriptor header.
    pub fn read(bytes: &[u8]) -> Self {
        VolumeDescriptor {
            descriptor_type: DescriptorType::from(bytes[0]),
            standard_identifier: array(&bytes[1..6]),
            version: bytes[6],
            data: bytes.to_vec(),
        }
    }
}

/// ISO 9660 9.1 Directory Record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub length: u8,
    pub extended_attribute_record_length: u8,
    /// Logical block holding the first byte of the extent.
    pub extent_location: EndianPair<u32>,
    pub data_length: EndianPair<u32>,
    pub recording_timestamp: BinaryTimestamp,
    pub file_flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap_size: u8,
    pub volume_sequence_number: EndianPair<u16>,
    /// Identifier bytes as recorded, including any `;N` version suffix.
    pub file_identifier: Vec<u8>,
    pub system_use: Vec<u8>,
}
impl DirectoryRecord {
    pub const FLAG_HIDDEN: u8 = 0x01;
    pub const FLAG_DIRECTORY: u8 = 0x02;
    pub const FLAG_ASSOCIATED_FILE: u8 = 0x04;
    pub const FLAG_RECORD: u8 = 0x08;
    pub const FLAG_PROTECTION: u8 = 0x10;
    pub const FLAG_MULTI_EXTENT: u8 = 0x80;

    /// Length of the fixed part before the file identifier.
    pub const FIXED_LENGTH: usize = 33;

    /// Reads one record from the start of `bytes`.
    ///
    /// Returns `None` when the length byte is too small for the fixed part, when the record runs
    /// past the end of `bytes`, or when the identifier runs past the end of the record.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let length = *bytes.first()? as usize;
        if length < Self::FIXED_LENGTH || length > bytes.len() {
            return None;
        }
        let identifier_length = bytes[32] as usize;
        let identifier_end = Self::FIXED_LENGTH + identifier_length;
        if identifier_end > length {
            return None;
        }
        // a padding byte follows identifiers of even length
        let system_use_start = (identifier_end + (identifier_length + 1) % 2).min(length);
        Some(DirectoryRecord {
            length: bytes[0],
            extended_attribute_record_length: bytes[1],
            extent_location: EndianPair::read_u32(&bytes[2..10]),
            data_length: EndianPair::read_u32(&bytes[10..18]),
            recording_timestamp: BinaryTimestamp::read(&bytes[18..25]),
            file_flags: bytes[25],
            file_unit_size: bytes[26],
            interleave_gap_size: bytes[27],
            volume_sequence_number: EndianPair::read_u16(&bytes[28..32]),
            file_identifier: bytes[Self::FIXED_LENGTH..identifier_end].to_vec(),
            system_use: bytes[system_use_start..length].to_vec(),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_flags & Self::FLAG_DIRECTORY != 0
    }

    /// Whether this is the `.` or `..` pseudo-entry of a directory.
    pub fn is_self_or_parent(&self) -> bool {
        matches!(self.file_identifier.as_slice(), [] | [0x00] | [0x01])
    }

    pub fn location(&self) -> u32 {
        self.extent_location.value()
    }

    pub fn data_length(&self) -> u32 {
        self.data_length.value()
    }

    /// Identifier as text; bytes that are not UTF-8 are replaced.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.file_identifier).into_owned()
    }

    pub fn field_warnings(&self, context: &str) -> Vec<FieldWarning> {
        let mut warnings = Vec::new();
        check_pair(&mut warnings, context, "extent location", &self.extent_location);
        check_pair(&mut warnings, context, "data length", &self.data_length);
        check_pair(
            &mut warnings,
            context,
            "volume sequence number",
            &self.volume_sequence_number,
        );
        if std::str::from_utf8(&self.file_identifier).is_err() {
            warnings.push(FieldWarning {
                context: format!("{}: file identifier", context),
                message: "not valid text, invalid bytes replaced".to_string(),
            });
        }
        check_timestamp(
            &mut warnings,
            context,
            "recording timestamp",
            &self.recording_timestamp.decode(),
        );
        warnings
    }
}

/// ISO 9660 8.4 Primary Volume Descriptor
#[derive(Debug, Clone)]
pub struct PrimaryVolumeDescriptor {
    pub version: u8,
    pub system_identifier: TextField,
    pub volume_identifier: TextField,
    /// Number of logical blocks in the volume.
    pub volume_space_size: EndianPair<u32>,
    pub volume_set_size: EndianPair<u16>,
    pub volume_sequence_number: EndianPair<u16>,
    pub logical_block_size: EndianPair<u16>,
    pub path_table_size: EndianPair<u32>,
    /// Location of the little-endian (type L) path table.
    pub l_path_table_location: u32,
    /// Zero when no optional copy is recorded.
    pub optional_l_path_table_location: u32,
    /// Location of the big-endian (type M) path table.
    pub m_path_table_location: u32,
    pub optional_m_path_table_location: u32,
    pub root_directory_record: DirectoryRecord,
    pub volume_set_identifier: TextField,
    pub publisher_identifier: TextField,
    pub data_preparer_identifier: TextField,
    pub application_identifier: TextField,
    pub copyright_file_identifier: TextField,
    pub abstract_file_identifier: TextField,
    pub bibliographic_file_identifier: TextField,
    pub creation_timestamp: DigitTimestamp,
    pub modification_timestamp: DigitTimestamp,
    pub expiration_timestamp: DigitTimestamp,
    pub effective_timestamp: DigitTimestamp,
    pub file_structure_version: u8,
    pub application_use: Vec<u8>,
}
impl PrimaryVolumeDescriptor {
    /// Parses a whole descriptor sector.
    ///
    /// Only the root directory record is mandatory; every other field degrades instead of failing.
    pub fn read(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < PRIMARY_VOLUME_DESCRIPTOR_LENGTH {
            return Err(FormatError::InvalidRootDirectoryRecord);
        }
        let root_bytes = &bytes
            [ROOT_DIRECTORY_RECORD_OFFSET..ROOT_DIRECTORY_RECORD_OFFSET + ROOT_DIRECTORY_RECORD_LENGTH];
        let root_directory_record =
            DirectoryRecord::read(root_bytes).ok_or(FormatError::InvalidRootDirectoryRecord)?;
        Ok(PrimaryVolumeDescriptor {
            version: bytes[6],
            system_identifier: TextField::decode(&bytes[8..40]),
            volume_identifier: TextField::decode(&bytes[40..72]),
            volume_space_size: EndianPair::read_u32(&bytes[80..88]),
            volume_set_size: EndianPair::read_u16(&bytes[120..124]),
            volume_sequence_number: EndianPair::read_u16(&bytes[124..128]),
            logical_block_size: EndianPair::read_u16(&bytes[128..132]),
            path_table_size: EndianPair::read_u32(&bytes[132..140]),
            l_path_table_location: u32_le(&bytes[140..144]),
            optional_l_path_table_location: u32_le(&bytes[144..148]),
            m_path_table_location: u32_be(&bytes[148..152]),
            optional_m_path_table_location: u32_be(&bytes[152..156]),
            root_directory_record,
            volume_set_identifier: TextField::decode(&bytes[190..318]),
            publisher_identifier: TextField::decode(&bytes[318..446]),
            data_preparer_identifier: TextField::decode(&bytes[446..574]),
            application_identifier: TextField::decode(&bytes[574..702]),
            copyright_file_identifier: TextField::decode(&bytes[702..739]),
            abstract_file_identifier: TextField::decode(&bytes[739..776]),
            bibliographic_file_identifier: TextField::decode(&bytes[776..813]),
            creation_timestamp: DigitTimestamp::read(&bytes[813..830]),
            modification_timestamp: DigitTimestamp::read(&bytes[830..847]),
            expiration_timestamp: DigitTimestamp::read(&bytes[847..864]),
            effective_timestamp: DigitTimestamp::read(&bytes[864..881]),
            file_structure_version: bytes[881],
            application_use: bytes[883..PRIMARY_VOLUME_DESCRIPTOR_LENGTH].to_vec(),
        })
    }

    pub fn field_warnings(&self) -> Vec<FieldWarning> {
        let context = "primary volume descriptor";
        let mut warnings = Vec::new();
        let texts = [
            ("system identifier", &self.system_identifier),
            ("volume identifier", &self.volume_identifier),
            ("volume set identifier", &self.volume_set_identifier),
            ("publisher identifier", &self.publisher_identifier),
            ("data preparer identifier", &self.data_preparer_identifier),
            ("application identifier", &self.application_identifier),
            ("copyright file identifier", &self.copyright_file_identifier),
            ("abstract file identifier", &self.abstract_file_identifier),
            ("bibliographic file identifier", &self.bibliographic_file_identifier),
        ];
        for (field, text) in texts {
            text.check(&mut warnings, context, field);
        }
        check_pair(&mut warnings, context, "volume space size", &self.volume_space_size);
        check_pair(&mut warnings, context, "volume set size", &self.volume_set_size);
        check_pair(
            &mut warnings,
            context,
            "volume sequence number",
            &self.volume_sequence_number,
        );
        check_pair(&mut warnings, context, "logical block size", &self.logical_block_size);
        check_pair(&mut warnings, context, "path table size", &self.path_table_size);
        let timestamps = [
            ("creation timestamp", &self.creation_timestamp),
            ("modification timestamp", &self.modification_timestamp),
            ("expiration timestamp", &self.expiration_timestamp),
            ("effective timestamp", &self.effective_timestamp),
        ];
        for (field, ts) in timestamps {
            check_timestamp(&mut warnings, context, field, &ts.decode());
        }
        warnings.extend(
            self.root_directory_record
                .field_warnings("primary volume descriptor: root directory record"),
        );
        warnings
    }
}
