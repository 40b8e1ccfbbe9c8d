//! Wire layout of a trace file.
//!
//! All integers are little-endian and written field by field.
//!
//! | Part                      | Layout |
//! |---------------------------|--------|
//! | Banner                    | 128 bytes of ASCII, space padded |
//! | Section header            | `dictionary_offset: u64`, `next_section_offset: u64` |
//! | Manifest section          | section header, `format_version: u32`, `program_name_idx: u32`, `description_idx: u32`, `created_at_ns: u64` |
//! | Work-item section header  | section header, `item_count: u32`, 7 x `base: u64`, `widths: u32` (7 nibbles) |
//! | Dictionary sub-chunk      | `count: u32`, then per string `len: u8` + bytes |
//!
//! A work-item section header is followed by its packed records and then by its
//! dictionary sub-chunk. The manifest is followed directly by its dictionary.

use crate::dictionary::{Dictionary, MAX_STRING_LEN};
use crate::packing::{FieldPacking, PackMode};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const BANNER_SIZE: usize = 128;
const BANNER_TEXT: &[u8] = b"PROFANE Performance Logger Binary Data Stream";

pub const FORMAT_VERSION: u32 = 2;

/// Next-section offset terminating the chain.
pub const END_OF_CHAIN: u64 = u64::MAX;

pub const SECTION_HEADER_SIZE: u64 = 8 + 8;
pub const MANIFEST_SECTION_SIZE: u64 = SECTION_HEADER_SIZE + 4 + 4 + 4 + 8;
pub const WORK_ITEM_SECTION_HEADER_SIZE: u64 =
    SECTION_HEADER_SIZE + 4 + (FIELD_COUNT as u64) * 8 + 4;

pub const FIELD_COUNT: usize = 7;

/// Most work items a single section may hold.
pub const MAX_SECTION_ITEMS: u32 = 1 << 16;

/// The banner every trace file starts with.
pub fn banner() -> [u8; BANNER_SIZE] {
    let mut b = [b' '; BANNER_SIZE];
    b[..BANNER_TEXT.len()].copy_from_slice(BANNER_TEXT);
    b
}

/// Packed fields of a work item, in the order they appear in each record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Field {
    StartTime,
    Duration,
    Category,
    Worker,
    Routine,
    Comment,
    TaskId,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::StartTime,
        Field::Duration,
        Field::Category,
        Field::Worker,
        Field::Routine,
        Field::Comment,
        Field::TaskId,
    ];

    pub fn mode(self) -> PackMode {
        match self {
            Field::StartTime | Field::Duration | Field::TaskId => PackMode::Absolute,
            Field::Category | Field::Worker | Field::Routine | Field::Comment => {
                PackMode::ZeroSentinel
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SectionHeader {
    pub dictionary_offset: u64,
    pub next_section_offset: u64,
}

impl Default for SectionHeader {
    fn default() -> Self {
        Self {
            dictionary_offset: 0,
            next_section_offset: END_OF_CHAIN,
        }
    }
}

impl SectionHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.dictionary_offset)?;
        w.write_u64::<LittleEndian>(self.next_section_offset)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let dictionary_offset = r.read_u64::<LittleEndian>()?;
        let next_section_offset = r.read_u64::<LittleEndian>()?;
        Ok(Self {
            dictionary_offset,
            next_section_offset,
        })
    }

    pub fn is_last(&self) -> bool {
        self.next_section_offset == END_OF_CHAIN
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct ManifestSection {
    pub header: SectionHeader,
    pub format_version: u32,
    pub program_name_idx: u32,
    pub description_idx: u32,
    pub created_at_ns: u64,
}

impl ManifestSection {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write_to(w)?;
        w.write_u32::<LittleEndian>(self.format_version)?;
        w.write_u32::<LittleEndian>(self.program_name_idx)?;
        w.write_u32::<LittleEndian>(self.description_idx)?;
        w.write_u64::<LittleEndian>(self.created_at_ns)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let header = SectionHeader::read_from(r)?;
        let format_version = r.read_u32::<LittleEndian>()?;
        let program_name_idx = r.read_u32::<LittleEndian>()?;
        let description_idx = r.read_u32::<LittleEndian>()?;
        let created_at_ns = r.read_u64::<LittleEndian>()?;
        Ok(Self {
            header,
            format_version,
            program_name_idx,
            description_idx,
            created_at_ns,
        })
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct WorkItemSectionHeader {
    pub header: SectionHeader,
    pub item_count: u32,
    pub fields: [FieldPacking; FIELD_COUNT],
}

impl WorkItemSectionHeader {
    pub fn field(&self, field: Field) -> FieldPacking {
        self.fields[field as usize]
    }

    /// Bytes taken by one packed record.
    pub fn record_size(&self) -> u64 {
        self.fields.iter().map(|f| u64::from(f.width)).sum()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write_to(w)?;
        w.write_u32::<LittleEndian>(self.item_count)?;
        let mut widths = 0u32;
        for (i, f) in self.fields.iter().enumerate() {
            w.write_u64::<LittleEndian>(f.base)?;
            widths |= u32::from(f.width & 0x0F) << (4 * i);
        }
        w.write_u32::<LittleEndian>(widths)?;
        Ok(())
    }

    /// Widths are taken as stored, range checking is left to the caller.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let header = SectionHeader::read_from(r)?;
        let item_count = r.read_u32::<LittleEndian>()?;
        let mut fields = [FieldPacking::default(); FIELD_COUNT];
        for f in fields.iter_mut() {
            f.base = r.read_u64::<LittleEndian>()?;
        }
        let widths = r.read_u32::<LittleEndian>()?;
        for (i, f) in fields.iter_mut().enumerate() {
            f.width = ((widths >> (4 * i)) & 0x0F) as u8;
        }
        Ok(Self {
            header,
            item_count,
            fields,
        })
    }
}

/// Write a dictionary sub-chunk. Strings must already be length checked.
pub fn write_dictionary_chunk<W: Write>(w: &mut W, strings: &[String]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(strings.len() as u32)?;
    for s in strings {
        debug_assert!(s.len() <= MAX_STRING_LEN);
        w.write_u8(s.len() as u8)?;
        w.write_all(s.as_bytes())?;
    }
    Ok(())
}

/// Read a dictionary sub-chunk, appending each string to `dictionary` as soon as it
/// is complete so a truncated chunk still yields its leading strings.
///
/// Invalid UTF-8 is replaced.
pub fn read_dictionary_chunk<R: Read>(r: &mut R, dictionary: &mut Dictionary) -> io::Result<u32> {
    let count = r.read_u32::<LittleEndian>()?;
    let mut buf = [0u8; MAX_STRING_LEN];
    for _ in 0..count {
        let len = usize::from(r.read_u8()?);
        r.read_exact(&mut buf[..len])?;
        dictionary.push(String::from_utf8_lossy(&buf[..len]).into_owned());
    }
    Ok(count)
}
