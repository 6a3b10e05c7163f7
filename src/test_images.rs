//! Synthetic ISO 9660 and GCM images for tests.

use crate::iso9660::STANDARD_IDENTIFIER;

/// 2024-01-02 03:04:05 UTC in the 7-byte directory record form.
pub const RECORD_TIMESTAMP: [u8; 7] = [124, 1, 2, 3, 4, 5, 48];

/// 2024-01-02 03:04:05.00 UTC in the 17-byte volume descriptor form.
pub const DESCRIPTOR_TIMESTAMP: &[u8; 17] = b"2024010203040500\x30";

pub const GCM_DOL_OFFSET: usize = 0x3000;
pub const GCM_DOL_SIZE: usize = 0x160;
pub const GCM_FST_OFFSET: usize = 0x4000;
pub const GCM_APPLOADER_SIZE: usize = 0x100;

/// A file or directory to lay out in a synthetic image.
pub enum Node {
    File(String, Vec<u8>),
    Dir(String, Vec<Node>),
}
impl Node {
    fn name(&self) -> &str {
        match self {
            Node::File(name, _) | Node::Dir(name, _) => name,
        }
    }
}

pub fn file(name: &str, data: &[u8]) -> Node {
    Node::File(name.to_string(), data.to_vec())
}

pub fn dir(name: &str, children: Vec<Node>) -> Node {
    Node::Dir(name.to_string(), children)
}

/// Position of `needle` in `haystack`, for patching fixtures.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn put_u16_pair(buf: &mut [u8], value: u16) {
    buf[0..2].copy_from_slice(&value.to_le_bytes());
    buf[2..4].copy_from_slice(&value.to_be_bytes());
}

fn put_u32_pair(buf: &mut [u8], value: u32) {
    buf[0..4].copy_from_slice(&value.to_le_bytes());
    buf[4..8].copy_from_slice(&value.to_be_bytes());
}

fn put_padded(buf: &mut [u8], text: &[u8]) {
    buf.fill(b' ');
    buf[..text.len()].copy_from_slice(text);
}

pub struct RecordFixture<'a> {
    pub identifier: &'a [u8],
    pub location: u32,
    pub data_length: u32,
    pub flags: u8,
    pub timestamp: [u8; 7],
}
impl<'a> RecordFixture<'a> {
    pub fn file(identifier: &'a [u8], location: u32, data_length: u32) -> Self {
        RecordFixture {
            identifier,
            location,
            data_length,
            flags: 0,
            timestamp: RECORD_TIMESTAMP,
        }
    }

    pub fn directory(identifier: &'a [u8], location: u32, data_length: u32) -> Self {
        RecordFixture {
            flags: 0x02,
            ..RecordFixture::file(identifier, location, data_length)
        }
    }
}

fn record_length(identifier_length: usize) -> usize {
    33 + identifier_length + (identifier_length + 1) % 2
}

pub fn directory_record(fixture: &RecordFixture) -> Vec<u8> {
    let identifier_length = fixture.identifier.len();
    let length = record_length(identifier_length);
    let mut r = vec![0u8; length];
    r[0] = length as u8;
    put_u32_pair(&mut r[2..10], fixture.location);
    put_u32_pair(&mut r[10..18], fixture.data_length);
    r[18..25].copy_from_slice(&fixture.timestamp);
    r[25] = fixture.flags;
    put_u16_pair(&mut r[28..32], 1);
    r[32] = identifier_length as u8;
    r[33..33 + identifier_length].copy_from_slice(fixture.identifier);
    r
}

pub fn primary_volume_descriptor(
    sector_size: usize,
    root_location: u32,
    root_length: u32,
    volume_space_size: u32,
) -> Vec<u8> {
    let mut d = vec![0u8; sector_size];
    d[0] = 1;
    d[1..6].copy_from_slice(&STANDARD_IDENTIFIER);
    d[6] = 1;
    put_padded(&mut d[8..40], b"TEST SYSTEM");
    put_padded(&mut d[40..72], b"TESTVOL");
    put_u32_pair(&mut d[80..88], volume_space_size);
    put_u16_pair(&mut d[120..124], 1);
    put_u16_pair(&mut d[124..128], 1);
    put_u16_pair(&mut d[128..132], sector_size as u16);
    let root = directory_record(&RecordFixture::directory(&[0], root_location, root_length));
    d[156..190].copy_from_slice(&root);
    put_padded(&mut d[190..318], b"TESTSET");
    put_padded(&mut d[318..446], b"PUBLISHER");
    put_padded(&mut d[446..574], b"PREPARER");
    put_padded(&mut d[574..702], b"APPLICATION");
    put_padded(&mut d[702..739], b"");
    put_padded(&mut d[739..776], b"");
    put_padded(&mut d[776..813], b"");
    d[813..830].copy_from_slice(DESCRIPTOR_TIMESTAMP);
    d[830..847].copy_from_slice(DESCRIPTOR_TIMESTAMP);
    d[847..863].fill(b'0');
    d[864..881].copy_from_slice(DESCRIPTOR_TIMESTAMP);
    d[881] = 1;
    d
}

pub fn terminator(sector_size: usize) -> Vec<u8> {
    let mut d = vec![0u8; sector_size];
    d[0] = 255;
    d[1..6].copy_from_slice(&STANDARD_IDENTIFIER);
    d[6] = 1;
    d
}

struct IsoWriter {
    sector_size: usize,
    image: Vec<u8>,
}
impl IsoWriter {
    fn allocate(&mut self, length: usize) -> u32 {
        let location = self.image.len() / self.sector_size;
        let sectors = length.div_ceil(self.sector_size).max(1);
        self.image
            .resize(self.image.len() + sectors * self.sector_size, 0);
        location as u32
    }

    fn write_at(&mut self, sector: u32, bytes: &[u8]) {
        let start = sector as usize * self.sector_size;
        self.image[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Records never straddle a sector boundary.
    fn layout(&self, lengths: &[usize]) -> (Vec<usize>, usize) {
        let mut offsets = Vec::new();
        let mut pos = 0;
        for &length in lengths {
            if pos % self.sector_size + length > self.sector_size {
                pos = (pos / self.sector_size + 1) * self.sector_size;
            }
            offsets.push(pos);
            pos += length;
        }
        let total = pos.div_ceil(self.sector_size).max(1) * self.sector_size;
        (offsets, total)
    }

    fn directory(&mut self, nodes: &[Node], parent: Option<(u32, u32)>) -> (u32, u32) {
        let mut lengths = vec![34, 34];
        lengths.extend(nodes.iter().map(|n| record_length(n.name().len())));
        let (offsets, total) = self.layout(&lengths);
        let location = self.allocate(total);
        let own = (location, total as u32);
        let parent = parent.unwrap_or(own);
        let mut records = vec![
            directory_record(&RecordFixture::directory(&[0], own.0, own.1)),
            directory_record(&RecordFixture::directory(&[1], parent.0, parent.1)),
        ];
        for node in nodes {
            match node {
                Node::File(name, data) => {
                    let loc = self.allocate(data.len());
                    self.write_at(loc, data);
                    records.push(directory_record(&RecordFixture::file(
                        name.as_bytes(),
                        loc,
                        data.len() as u32,
                    )));
                }
                Node::Dir(name, children) => {
                    let (loc, len) = self.directory(children, Some(own));
                    records.push(directory_record(&RecordFixture::directory(
                        name.as_bytes(),
                        loc,
                        len,
                    )));
                }
            }
        }
        let mut extent = vec![0u8; total];
        for (record, offset) in records.iter().zip(offsets) {
            extent[offset..offset + record.len()].copy_from_slice(record);
        }
        self.write_at(location, &extent);
        own
    }
}

/// An ISO 9660 image: system area, PVD at sector 16, terminator at 17, then directories and files.
pub fn iso_image(sector_size: usize, root: &[Node]) -> Vec<u8> {
    let mut writer = IsoWriter {
        sector_size,
        image: vec![0u8; sector_size * 18],
    };
    let (root_location, root_length) = writer.directory(root, None);
    let volume_space_size = (writer.image.len() / sector_size) as u32;
    let pvd = primary_volume_descriptor(sector_size, root_location, root_length, volume_space_size);
    writer.write_at(16, &pvd);
    writer.write_at(17, &terminator(sector_size));
    writer.image
}

/// Byte offset of the directory record whose identifier is `identifier`.
pub fn record_offset(image: &[u8], identifier: &[u8]) -> usize {
    let mut needle = vec![identifier.len() as u8];
    needle.extend_from_slice(identifier);
    find(image, &needle).expect("identifier present") - 32
}

struct FstRow {
    flag: u8,
    name_offset: u32,
    first: u32,
    second: u32,
}

fn flatten<'a>(
    nodes: &'a [Node],
    parent: u32,
    rows: &mut Vec<FstRow>,
    names: &mut Vec<u8>,
    payloads: &mut Vec<(usize, &'a [u8])>,
) {
    for node in nodes {
        let index = rows.len();
        let name_offset = names.len() as u32;
        names.extend_from_slice(node.name().as_bytes());
        names.push(0);
        match node {
            Node::File(_, data) => {
                rows.push(FstRow {
                    flag: 0,
                    name_offset,
                    first: 0,
                    second: data.len() as u32,
                });
                payloads.push((index, data.as_slice()));
            }
            Node::Dir(_, children) => {
                rows.push(FstRow {
                    flag: 1,
                    name_offset,
                    first: parent,
                    second: 0,
                });
                flatten(children, index as u32, rows, names, payloads);
                rows[index].second = rows.len() as u32;
            }
        }
    }
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// A GameCube disc: boot.bin, bi2.bin, apploader, main.dol at 0x3000, FST at 0x4000, file data after.
pub fn gcm_image(root: &[Node]) -> Vec<u8> {
    let mut rows = vec![FstRow {
        flag: 1,
        name_offset: 0,
        first: 0,
        second: 0,
    }];
    let mut names = Vec::new();
    let mut payloads = Vec::new();
    flatten(root, 0, &mut rows, &mut names, &mut payloads);
    rows[0].second = rows.len() as u32;

    let fst_size = 12 * rows.len() + names.len();
    let mut image = vec![0u8; (GCM_FST_OFFSET + fst_size).next_multiple_of(0x20)];
    for (index, data) in payloads {
        rows[index].first = image.len() as u32;
        image.extend_from_slice(data);
        image.resize(image.len().next_multiple_of(4), 0);
    }

    // boot.bin
    image[0..4].copy_from_slice(b"GTST");
    image[4..6].copy_from_slice(b"01");
    put_u32(&mut image, 0x1C, 0xC233_9F3D);
    image[0x20..0x29].copy_from_slice(b"Test Game");
    put_u32(&mut image, 0x420, GCM_DOL_OFFSET as u32);
    put_u32(&mut image, 0x424, GCM_FST_OFFSET as u32);
    put_u32(&mut image, 0x428, fst_size as u32);
    put_u32(&mut image, 0x42C, fst_size as u32);

    // bi2.bin
    put_u32(&mut image, 0x444, 0x0180_0000);
    put_u32(&mut image, 0x458, 1);

    // apploader
    image[0x2440..0x244A].copy_from_slice(b"2004/01/01");
    put_u32(&mut image, 0x2450, 0x8120_0000);
    put_u32(&mut image, 0x2454, GCM_APPLOADER_SIZE as u32);
    put_u32(&mut image, 0x2458, 0x40);
    image[0x2460..0x2440 + GCM_APPLOADER_SIZE].fill(0xAA);

    // main.dol: one text and one data section
    put_u32(&mut image, GCM_DOL_OFFSET, 0x100);
    put_u32(&mut image, GCM_DOL_OFFSET + 0x1C, 0x140);
    put_u32(&mut image, GCM_DOL_OFFSET + 0x90, 0x40);
    put_u32(&mut image, GCM_DOL_OFFSET + 0xAC, 0x20);
    image[GCM_DOL_OFFSET + 0x100..GCM_DOL_OFFSET + GCM_DOL_SIZE].fill(0xDD);

    for (i, row) in rows.iter().enumerate() {
        let start = GCM_FST_OFFSET + 12 * i;
        image[start] = row.flag;
        image[start + 1..start + 4].copy_from_slice(&row.name_offset.to_be_bytes()[1..]);
        put_u32(&mut image, start + 4, row.first);
        put_u32(&mut image, start + 8, row.second);
    }
    let strings = GCM_FST_OFFSET + 12 * rows.len();
    image[strings..strings + names.len()].copy_from_slice(&names);
    image
}

/// The 12 bytes of FST entry `index` in an image built by [`gcm_image`].
pub fn fst_entry_mut(image: &mut [u8], index: usize) -> &mut [u8] {
    let start = GCM_FST_OFFSET + 12 * index;
    &mut image[start..start + 12]
}
