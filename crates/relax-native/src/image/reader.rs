//! Image parsing.

use super::builder::{Image, Section};
use super::format::{
    FILE_HEADER_SIZE, FileHeader, RELOCATION_SIZE, Relocation, SECTION_HEADER_SIZE, SYMBOL_SIZE,
    SectionHeader, Symbol, record,
};
use super::strings::{StringTable, decode_section_name};
use crate::error::ImageError;

fn slice(bytes: &[u8], at: usize, len: usize) -> Result<&[u8], ImageError> {
    bytes
        .get(at..)
        .and_then(|rest| rest.get(..len))
        .ok_or(ImageError::Truncated { at, need: len })
}

impl Image {
    /// Read an image produced by `ImageBuilder`.
    ///
    /// Section contents are the raw bytes up to the virtual size; alignment
    /// padding is dropped and restored by `to_bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Image, ImageError> {
        let header = FileHeader::from_bytes(&record(bytes, 0)?);

        let symbol_table = header.symbol_table as usize;
        let symbol_count = header.symbol_count as usize;
        let mut symbols = Vec::with_capacity(symbol_count.min(bytes.len() / SYMBOL_SIZE));
        for i in 0..symbol_count {
            symbols.push(Symbol::from_bytes(&record(
                bytes,
                symbol_table + SYMBOL_SIZE * i,
            )?));
        }
        let strings = StringTable::parse(bytes, symbol_table + SYMBOL_SIZE * symbol_count)?;

        let mut sections = Vec::with_capacity(header.section_count as usize);
        for i in 0..header.section_count as usize {
            let at = FILE_HEADER_SIZE + SECTION_HEADER_SIZE * i;
            let section = SectionHeader::from_bytes(&record(bytes, at)?);

            let base = section.relocations_offset as usize;
            let mut relocations = Vec::with_capacity(section.relocation_count as usize);
            for j in 0..section.relocation_count as usize {
                let reloc = Relocation::from_bytes(&record(bytes, base + RELOCATION_SIZE * j)?);
                if reloc.symbol as usize >= symbol_count {
                    return Err(ImageError::BadRelocation {
                        section: decode_section_name(&section.name, &strings)?,
                        symbol: reloc.symbol,
                    });
                }
                relocations.push(reloc);
            }

            let data = if section.is_zeroed() || section.raw_size == 0 {
                Vec::new()
            } else {
                let len = section.virtual_size.min(section.raw_size) as usize;
                slice(bytes, section.raw_offset as usize, len)?.to_vec()
            };

            sections.push(Section {
                header: section,
                data,
                relocations,
            });
        }

        log::trace!(
            "parsed image: {} sections, {} symbols",
            sections.len(),
            symbols.len()
        );

        Ok(Image {
            header,
            sections,
            symbols,
            strings,
            size: bytes.len() as u32,
        })
    }
}
