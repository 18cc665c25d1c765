//! Image construction and serialization.

use relax_core::align_up;

use super::ImageConfig;
use super::format::{
    FILE_HEADER_SIZE, FileHeader, IMAGE_SYM_UNDEFINED, MACHINE_AMD64, RELOCATION_SIZE, Relocation,
    SECTION_HEADER_SIZE, SYMBOL_SIZE, SectionHeader, Symbol,
};
use super::strings::{
    StringTable, decode_section_name, decode_symbol_name, encode_section_name, encode_symbol_name,
};
use crate::error::ImageError;

/// Section numbers are 1-based `i16`; the top values are reserved.
const MAX_SECTIONS: usize = 0xFEFF;
const MAX_RELOCATIONS: usize = 0xFFFF;

/// Handle to a section added to an `ImageBuilder`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SectionId(usize);

impl SectionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a symbol added to an `ImageBuilder`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
struct PendingSection {
    name: String,
    data: Vec<u8>,
    virtual_size: u32,
    zeroed: bool,
    characteristics: u32,
    relocations: Vec<Relocation>,
}

#[derive(Debug)]
struct PendingSymbol {
    name: String,
    value: u32,
    section: Option<SectionId>,
    kind: u16,
    class: u8,
}

/// Collects sections, symbols and relocations, then lays out the image.
#[derive(Debug)]
pub struct ImageBuilder {
    config: ImageConfig,
    sections: Vec<PendingSection>,
    symbols: Vec<PendingSymbol>,
}

impl ImageBuilder {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Section with raw contents; the virtual size is the data length.
    pub fn add_section(
        &mut self,
        name: impl Into<String>,
        data: Vec<u8>,
        characteristics: u32,
    ) -> SectionId {
        let id = SectionId(self.sections.len());
        self.sections.push(PendingSection {
            name: name.into(),
            virtual_size: data.len() as u32,
            data,
            zeroed: false,
            characteristics,
            relocations: Vec::new(),
        });
        id
    }

    /// Zero-initialized section occupying `size` bytes of address space only.
    pub fn add_zeroed(
        &mut self,
        name: impl Into<String>,
        size: u32,
        characteristics: u32,
    ) -> SectionId {
        let id = SectionId(self.sections.len());
        self.sections.push(PendingSection {
            name: name.into(),
            data: Vec::new(),
            virtual_size: size,
            zeroed: true,
            characteristics,
            relocations: Vec::new(),
        });
        id
    }

    /// Symbol defined at `value` in `section`, or undefined when `None`.
    pub fn add_symbol(
        &mut self,
        name: impl Into<String>,
        value: u32,
        section: Option<SectionId>,
        kind: u16,
        class: u8,
    ) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(PendingSymbol {
            name: name.into(),
            value,
            section,
            kind,
            class,
        });
        id
    }

    /// Fails when `section` did not come from this builder. Symbols are
    /// checked at `build`, since they may be added later.
    pub fn add_relocation(
        &mut self,
        section: SectionId,
        offset: u32,
        symbol: SymbolId,
        kind: u16,
    ) -> Result<(), ImageError> {
        let s = self
            .sections
            .get_mut(section.0)
            .ok_or(ImageError::UnknownSection { index: section.0 })?;
        s.relocations.push(Relocation {
            offset,
            symbol: symbol.0,
            kind,
        });
        Ok(())
    }

    pub fn build(self) -> Result<Image, ImageError> {
        let ImageConfig {
            file_alignment,
            section_alignment,
        } = self.config;
        self.config.validate()?;

        if self.sections.len() > MAX_SECTIONS {
            return Err(ImageError::TooManySections {
                count: self.sections.len(),
            });
        }

        let mut strings = StringTable::new();
        let mut headers = Vec::with_capacity(self.sections.len());
        for s in &self.sections {
            if s.relocations.len() > MAX_RELOCATIONS {
                return Err(ImageError::TooManyRelocations {
                    section: s.name.clone(),
                    count: s.relocations.len(),
                });
            }
            if let Some(r) = s
                .relocations
                .iter()
                .find(|r| r.symbol as usize >= self.symbols.len())
            {
                return Err(ImageError::BadRelocation {
                    section: s.name.clone(),
                    symbol: r.symbol,
                });
            }
            headers.push(encode_section_name(&s.name, &mut strings)?);
        }

        let mut symbols = Vec::with_capacity(self.symbols.len());
        for sym in &self.symbols {
            let section = match sym.section {
                Some(id) => id.0 as i16 + 1,
                None => IMAGE_SYM_UNDEFINED,
            };
            symbols.push(Symbol {
                name: encode_symbol_name(&sym.name, &mut strings)?,
                value: sym.value,
                section,
                kind: sym.kind,
                class: sym.class,
                aux_count: 0,
            });
        }

        // header region: file header, section table, relocations, symbols, strings
        let mut cursor = (FILE_HEADER_SIZE + SECTION_HEADER_SIZE * self.sections.len()) as u32;
        let mut reloc_offsets = Vec::with_capacity(self.sections.len());
        for s in &self.sections {
            if s.relocations.is_empty() {
                reloc_offsets.push(0);
            } else {
                reloc_offsets.push(cursor);
                cursor += (RELOCATION_SIZE * s.relocations.len()) as u32;
            }
        }
        let symbol_table = cursor;
        cursor += (SYMBOL_SIZE * symbols.len()) as u32;
        let headers_end = cursor + strings.size();

        let mut raw_cursor = align_up(headers_end, file_alignment);
        let mut virtual_cursor = align_up(headers_end, section_alignment);
        let mut sections = Vec::with_capacity(self.sections.len());
        let pending = self.sections.into_iter().zip(headers).zip(reloc_offsets);
        for ((s, name), relocations_offset) in pending {
            let (raw_offset, raw_size) = if s.zeroed {
                (0, 0)
            } else {
                let size = align_up(s.data.len() as u32, file_alignment);
                let offset = raw_cursor;
                raw_cursor += size;
                (offset, size)
            };
            let virtual_address = virtual_cursor;
            virtual_cursor += align_up(s.virtual_size.max(1), section_alignment);

            sections.push(Section {
                header: SectionHeader {
                    name,
                    virtual_size: s.virtual_size,
                    virtual_address,
                    raw_size,
                    raw_offset,
                    relocations_offset,
                    line_numbers_offset: 0,
                    relocation_count: s.relocations.len() as u16,
                    line_number_count: 0,
                    characteristics: s.characteristics,
                },
                data: s.data,
                relocations: s.relocations,
            });
        }

        let header = FileHeader {
            machine: MACHINE_AMD64,
            section_count: sections.len() as u16,
            timestamp: 0,
            symbol_table,
            symbol_count: symbols.len() as u32,
            optional_header_size: 0,
            characteristics: 0,
        };

        log::debug!(
            "image: {} sections, {} symbols, {} bytes",
            sections.len(),
            symbols.len(),
            raw_cursor
        );

        Ok(Image {
            header,
            sections,
            symbols,
            strings,
            size: raw_cursor,
        })
    }
}

/// Section header plus its contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub header: SectionHeader,
    /// Initialized contents without file-alignment padding.
    pub data: Vec<u8>,
    pub relocations: Vec<Relocation>,
}

/// Laid-out relocatable image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub header: FileHeader,
    pub sections: Vec<Section>,
    pub symbols: Vec<Symbol>,
    pub strings: StringTable,
    pub(crate) size: u32,
}

impl Image {
    /// Total file length.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn section_name(&self, section: &Section) -> Result<String, ImageError> {
        decode_section_name(&section.header.name, &self.strings)
    }

    pub fn symbol_name(&self, symbol: &Symbol) -> Result<String, ImageError> {
        decode_symbol_name(&symbol.name, &self.strings)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| self.section_name(s).is_ok_and(|n| n == name))
    }

    pub fn symbol(&self, name: &str) -> Option<(u32, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .find(|(_, s)| self.symbol_name(s).is_ok_and(|n| n == name))
            .map(|(i, s)| (i as u32, s))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size as usize];
        put(&mut out, 0, &self.header.to_bytes());

        for (i, section) in self.sections.iter().enumerate() {
            let at = FILE_HEADER_SIZE + SECTION_HEADER_SIZE * i;
            put(&mut out, at, &section.header.to_bytes());

            let base = section.header.relocations_offset as usize;
            for (j, reloc) in section.relocations.iter().enumerate() {
                put(&mut out, base + RELOCATION_SIZE * j, &reloc.to_bytes());
            }
            if section.header.raw_size > 0 {
                put(&mut out, section.header.raw_offset as usize, &section.data);
            }
        }

        let base = self.header.symbol_table as usize;
        for (i, symbol) in self.symbols.iter().enumerate() {
            put(&mut out, base + SYMBOL_SIZE * i, &symbol.to_bytes());
        }
        put(
            &mut out,
            base + SYMBOL_SIZE * self.symbols.len(),
            &self.strings.to_bytes(),
        );
        out
    }
}

fn put(out: &mut Vec<u8>, at: usize, bytes: &[u8]) {
    let end = at + bytes.len();
    if out.len() < end {
        out.resize(end, 0);
    }
    out[at..end].copy_from_slice(bytes);
}
