use static_assertions::assert_eq_size;

use crate::iso9660::TextField;

/// Marks a GameCube disc; stored at 0x1C of the disk header.
pub const DVD_MAGIC: u32 = 0xC233_9F3D;

pub const DISK_HEADER_OFFSET: u64 = 0;
pub const DISK_HEADER_SIZE: usize = 0x440;
pub const DISK_HEADER_INFORMATION_OFFSET: u64 = 0x440;
pub const DISK_HEADER_INFORMATION_SIZE: usize = 0x2000;
pub const APPLOADER_OFFSET: u64 = 0x2440;
pub const APPLOADER_HEADER_SIZE: usize = 0x20;
pub const DOL_HEADER_SIZE: usize = 0x100;

fn be32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn be32_array<const N: usize>(bytes: &[u8], offset: usize) -> [u32; N] {
    let mut values = [0u32; N];
    for (i, value) in values.iter_mut().enumerate() {
        *value = be32(bytes, offset + 4 * i);
    }
    values
}

/// Disk header (boot.bin), the first 0x440 bytes of the disc.
#[derive(Default, Debug, Clone)]
pub struct DiskHeader {
    pub game_code: [u8; 4],
    pub maker_code: [u8; 2],
    pub disk_id: u8,
    pub version: u8,
    pub audio_streaming: u8,
    pub stream_buffer_size: u8,
    /// Should be [`DVD_MAGIC`].
    pub dvd_magic: u32,
    pub game_name: TextField,
    pub debug_monitor_offset: u32,
    pub debug_monitor_load_address: u32,
    pub main_dol_offset: u32,
    pub fst_offset: u32,
    pub fst_size: u32,
    /// Largest FST among the discs of a multi-disc game.
    pub max_fst_size: u32,
    pub user_position: u32,
    pub user_length: u32,
}
impl DiskHeader {
    pub fn size() -> usize {
        DISK_HEADER_SIZE
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.game_code.copy_from_slice(&bytes[0x000..0x004]);
        r.maker_code.copy_from_slice(&bytes[0x004..0x006]);
        r.disk_id = bytes[0x006];
        r.version = bytes[0x007];
        r.audio_streaming = bytes[0x008];
        r.stream_buffer_size = bytes[0x009];
        r.dvd_magic = be32(bytes, 0x01C);
        r.game_name = TextField::decode_nul_terminated(&bytes[0x020..0x400]);
        r.debug_monitor_offset = be32(bytes, 0x400);
        r.debug_monitor_load_address = be32(bytes, 0x404);
        r.main_dol_offset = be32(bytes, 0x420);
        r.fst_offset = be32(bytes, 0x424);
        r.fst_size = be32(bytes, 0x428);
        r.max_fst_size = be32(bytes, 0x42C);
        r.user_position = be32(bytes, 0x430);
        r.user_length = be32(bytes, 0x434);
        r
    }

    pub fn has_dvd_magic(&self) -> bool {
        self.dvd_magic == DVD_MAGIC
    }

    /// Game code and maker code, e.g. `GALE01`.
    pub fn game_id(&self) -> String {
        let mut id = String::from_utf8_lossy(&self.game_code).into_owned();
        id.push_str(&String::from_utf8_lossy(&self.maker_code));
        id
    }
}

/// Disk header information (bi2.bin), 0x2000 bytes following the disk header.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DiskHeaderInformation {
    pub debug_monitor_size: u32,
    pub simulated_memory_size: u32,
    pub argument_offset: u32,
    pub debug_flag: u32,
    pub track_location: u32,
    pub track_size: u32,
    pub country_code: u32,
}
impl DiskHeaderInformation {
    pub fn size() -> usize {
        DISK_HEADER_INFORMATION_SIZE
    }

    pub fn read(bytes: &[u8]) -> Self {
        DiskHeaderInformation {
            debug_monitor_size: be32(bytes, 0x00),
            simulated_memory_size: be32(bytes, 0x04),
            argument_offset: be32(bytes, 0x08),
            debug_flag: be32(bytes, 0x0C),
            track_location: be32(bytes, 0x10),
            track_size: be32(bytes, 0x14),
            country_code: be32(bytes, 0x18),
        }
    }
}

/// Header at the start of the apploader region.
#[derive(Default, Debug, Clone)]
pub struct ApploaderHeader {
    /// Build date, e.g. `2001/10/22`.
    pub date: TextField,
    pub entry_point: u32,
    pub size: u32,
    pub trailer_size: u32,
}
impl ApploaderHeader {
    pub fn size() -> usize {
        APPLOADER_HEADER_SIZE
    }

    pub fn read(bytes: &[u8]) -> Self {
        ApploaderHeader {
            date: TextField::decode_nul_terminated(&bytes[0x00..0x10]),
            entry_point: be32(bytes, 0x10),
            size: be32(bytes, 0x14),
            trailer_size: be32(bytes, 0x18),
        }
    }
}

/// One File System Table entry as stored on disc.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FstEntry {
    /// 0 for a file, 1 for a directory.
    pub flag: u8,
    /// 24-bit big-endian offset into the string table.
    pub name_offset: [u8; 3],
    /// File: data offset. Directory: parent index.
    pub first: u32,
    /// File: data length. Directory: index of the first entry after the subtree.
    pub second: u32,
}
assert_eq_size!(FstEntry, [u8; 12]);

/// What an FST entry describes, once its flag is known to be valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FstEntryKind {
    File { offset: u32, length: u32 },
    Directory { parent: u32, next: u32 },
}

impl FstEntry {
    pub fn size() -> usize {
        std::mem::size_of::<FstEntry>()
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.flag = bytes[0];
        r.name_offset.copy_from_slice(&bytes[1..4]);
        r.first = be32(bytes, 4);
        r.second = be32(bytes, 8);
        r
    }

    pub fn name_offset(&self) -> u32 {
        u32::from_be_bytes([0, self.name_offset[0], self.name_offset[1], self.name_offset[2]])
    }

    /// `None` when the flag byte is neither 0 nor 1.
    pub fn kind(&self) -> Option<FstEntryKind> {
        match self.flag {
            0 => Some(FstEntryKind::File {
                offset: self.first,
                length: self.second,
            }),
            1 => Some(FstEntryKind::Directory {
                parent: self.first,
                next: self.second,
            }),
            _ => None,
        }
    }
}

/// Section table of a DOL executable (main.dol).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DolHeader {
    pub text_offsets: [u32; 7],
    pub data_offsets: [u32; 11],
    pub text_addresses: [u32; 7],
    pub data_addresses: [u32; 11],
    pub text_sizes: [u32; 7],
    pub data_sizes: [u32; 11],
    pub bss_address: u32,
    pub bss_size: u32,
    pub entry_point: u32,
}
impl DolHeader {
    pub fn size() -> usize {
        DOL_HEADER_SIZE
    }

    pub fn read(bytes: &[u8]) -> Self {
        DolHeader {
            text_offsets: be32_array(bytes, 0x00),
            data_offsets: be32_array(bytes, 0x1C),
            text_addresses: be32_array(bytes, 0x48),
            data_addresses: be32_array(bytes, 0x64),
            text_sizes: be32_array(bytes, 0x90),
            data_sizes: be32_array(bytes, 0xAC),
            bss_address: be32(bytes, 0xD8),
            bss_size: be32(bytes, 0xDC),
            entry_point: be32(bytes, 0xE0),
        }
    }

    /// Length of the whole file: the furthest end of any section, and never less than the header.
    pub fn file_size(&self) -> u64 {
        let text = self.text_offsets.iter().zip(&self.text_sizes);
        let data = self.data_offsets.iter().zip(&self.data_sizes);
        text.chain(data)
            .filter(|(_, size)| **size != 0)
            .map(|(&offset, &size)| u64::from(offset) + u64::from(size))
            .fold(DOL_HEADER_SIZE as u64, u64::max)
    }
}
