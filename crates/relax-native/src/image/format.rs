//! Fixed-size COFF records.
//!
//! All fields are little-endian. Records are read from exact-size arrays; the
//! reader does the bounds check once per record.

use crate::error::ImageError;

pub const FILE_HEADER_SIZE: usize = 20;
pub const SECTION_HEADER_SIZE: usize = 40;
pub const RELOCATION_SIZE: usize = 10;
pub const SYMBOL_SIZE: usize = 18;

pub const MACHINE_AMD64: u16 = 0x8664;

/// 32-bit displacement relative to the end of the field.
pub const IMAGE_REL_AMD64_REL32: u16 = 0x0004;

pub const IMAGE_SYM_CLASS_EXTERNAL: u8 = 2;
pub const IMAGE_SYM_CLASS_STATIC: u8 = 3;
pub const IMAGE_SYM_DTYPE_FUNCTION: u16 = 0x20;
/// Section number of an undefined symbol.
pub const IMAGE_SYM_UNDEFINED: i16 = 0;

pub const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
pub const IMAGE_SCN_CNT_UNINITIALIZED_DATA: u32 = 0x0000_0080;
pub const IMAGE_SCN_ALIGN_16BYTES: u32 = 0x0050_0000;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

/// `.text`: 0x60500020
pub const TEXT: u32 =
    IMAGE_SCN_CNT_CODE | IMAGE_SCN_ALIGN_16BYTES | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ;
/// `.data`: 0xC0500040
pub const DATA: u32 = IMAGE_SCN_CNT_INITIALIZED_DATA
    | IMAGE_SCN_ALIGN_16BYTES
    | IMAGE_SCN_MEM_READ
    | IMAGE_SCN_MEM_WRITE;
/// `.bss`: 0xC0500080
pub const BSS: u32 = IMAGE_SCN_CNT_UNINITIALIZED_DATA
    | IMAGE_SCN_ALIGN_16BYTES
    | IMAGE_SCN_MEM_READ
    | IMAGE_SCN_MEM_WRITE;

#[inline]
fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

#[inline]
fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Copy `N` bytes starting at `at`.
pub(crate) fn record<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N], ImageError> {
    bytes
        .get(at..)
        .and_then(|rest| rest.get(..N))
        .and_then(|slice| slice.try_into().ok())
        .ok_or(ImageError::Truncated { at, need: N })
}

/// File header, first 20 bytes of the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub machine: u16,
    pub section_count: u16,
    pub timestamp: u32,
    pub symbol_table: u32,
    pub symbol_count: u32,
    pub optional_header_size: u16,
    pub characteristics: u16,
}

impl FileHeader {
    pub fn from_bytes(b: &[u8; FILE_HEADER_SIZE]) -> Self {
        Self {
            machine: le16(b, 0),
            section_count: le16(b, 2),
            timestamp: le32(b, 4),
            symbol_table: le32(b, 8),
            symbol_count: le32(b, 12),
            optional_header_size: le16(b, 16),
            characteristics: le16(b, 18),
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut b = [0u8; FILE_HEADER_SIZE];
        b[0..2].copy_from_slice(&self.machine.to_le_bytes());
        b[2..4].copy_from_slice(&self.section_count.to_le_bytes());
        b[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        b[8..12].copy_from_slice(&self.symbol_table.to_le_bytes());
        b[12..16].copy_from_slice(&self.symbol_count.to_le_bytes());
        b[16..18].copy_from_slice(&self.optional_header_size.to_le_bytes());
        b[18..20].copy_from_slice(&self.characteristics.to_le_bytes());
        b
    }
}

/// Section table entry.
///
/// `name` holds the raw 8 bytes: the name itself NUL-padded, or `/<offset>`
/// into the string table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub raw_size: u32,
    pub raw_offset: u32,
    pub relocations_offset: u32,
    pub line_numbers_offset: u32,
    pub relocation_count: u16,
    pub line_number_count: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn from_bytes(b: &[u8; SECTION_HEADER_SIZE]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&b[0..8]);
        Self {
            name,
            virtual_size: le32(b, 8),
            virtual_address: le32(b, 12),
            raw_size: le32(b, 16),
            raw_offset: le32(b, 20),
            relocations_offset: le32(b, 24),
            line_numbers_offset: le32(b, 28),
            relocation_count: le16(b, 32),
            line_number_count: le16(b, 34),
            characteristics: le32(b, 36),
        }
    }

    pub fn to_bytes(&self) -> [u8; SECTION_HEADER_SIZE] {
        let mut b = [0u8; SECTION_HEADER_SIZE];
        b[0..8].copy_from_slice(&self.name);
        b[8..12].copy_from_slice(&self.virtual_size.to_le_bytes());
        b[12..16].copy_from_slice(&self.virtual_address.to_le_bytes());
        b[16..20].copy_from_slice(&self.raw_size.to_le_bytes());
        b[20..24].copy_from_slice(&self.raw_offset.to_le_bytes());
        b[24..28].copy_from_slice(&self.relocations_offset.to_le_bytes());
        b[28..32].copy_from_slice(&self.line_numbers_offset.to_le_bytes());
        b[32..34].copy_from_slice(&self.relocation_count.to_le_bytes());
        b[34..36].copy_from_slice(&self.line_number_count.to_le_bytes());
        b[36..40].copy_from_slice(&self.characteristics.to_le_bytes());
        b
    }

    /// Zero-initialized sections carry no raw data.
    pub fn is_zeroed(&self) -> bool {
        self.characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the patched field within the section.
    pub offset: u32,
    /// Index into the symbol table.
    pub symbol: u32,
    pub kind: u16,
}

impl Relocation {
    pub fn from_bytes(b: &[u8; RELOCATION_SIZE]) -> Self {
        Self {
            offset: le32(b, 0),
            symbol: le32(b, 4),
            kind: le16(b, 8),
        }
    }

    pub fn to_bytes(&self) -> [u8; RELOCATION_SIZE] {
        let mut b = [0u8; RELOCATION_SIZE];
        b[0..4].copy_from_slice(&self.offset.to_le_bytes());
        b[4..8].copy_from_slice(&self.symbol.to_le_bytes());
        b[8..10].copy_from_slice(&self.kind.to_le_bytes());
        b
    }
}

/// Symbol table entry.
///
/// `name` is either inline (NUL-padded) or four zero bytes followed by a
/// string table offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: [u8; 8],
    pub value: u32,
    /// 1-based section number, `IMAGE_SYM_UNDEFINED` for imports.
    pub section: i16,
    pub kind: u16,
    pub class: u8,
    pub aux_count: u8,
}

impl Symbol {
    pub fn from_bytes(b: &[u8; SYMBOL_SIZE]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&b[0..8]);
        Self {
            name,
            value: le32(b, 8),
            section: le16(b, 12) as i16,
            kind: le16(b, 14),
            class: b[16],
            aux_count: b[17],
        }
    }

    pub fn to_bytes(&self) -> [u8; SYMBOL_SIZE] {
        let mut b = [0u8; SYMBOL_SIZE];
        b[0..8].copy_from_slice(&self.name);
        b[8..12].copy_from_slice(&self.value.to_le_bytes());
        b[12..14].copy_from_slice(&self.section.to_le_bytes());
        b[14..16].copy_from_slice(&self.kind.to_le_bytes());
        b[16] = self.class;
        b[17] = self.aux_count;
        b
    }

    pub fn is_undefined(&self) -> bool {
        self.section == IMAGE_SYM_UNDEFINED
    }
}
