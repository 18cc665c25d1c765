//! Object file assembly from lowered units.

use indexmap::IndexMap;

use crate::error::ImageError;
use crate::image::format::{
    BSS, DATA, IMAGE_REL_AMD64_REL32, IMAGE_SYM_CLASS_EXTERNAL, IMAGE_SYM_DTYPE_FUNCTION, TEXT,
};
use crate::image::{Image, ImageBuilder, ImageConfig, SectionId, SymbolId};
use crate::lower::CodeUnit;

const FUNCTION_ALIGN: usize = 16;
const INT3: u8 = 0xCC;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Home {
    Text,
    Data,
    Bss,
}

#[derive(Debug)]
struct Definition {
    home: Home,
    offset: u32,
}

/// Packs functions into `.text`, initialized data into `.data` and
/// reservations into `.bss`, with one external symbol per definition.
///
/// Calls to symbols not defined here become undefined symbols with
/// `IMAGE_REL_AMD64_REL32` relocations at the call displacement.
#[derive(Debug)]
pub struct ObjectWriter {
    config: ImageConfig,
    text: Vec<u8>,
    data: Vec<u8>,
    bss: u32,
    definitions: IndexMap<String, Definition>,
    /// `.text` offset of each call displacement and its symbol.
    calls: Vec<(u32, String)>,
}

fn pad_to(buf: &mut Vec<u8>, align: usize, fill: u8) {
    let align = align.max(1);
    while buf.len() % align != 0 {
        buf.push(fill);
    }
}

impl ObjectWriter {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            text: Vec::new(),
            data: Vec::new(),
            bss: 0,
            definitions: IndexMap::new(),
            calls: Vec::new(),
        }
    }

    /// Append a function; returns its `.text` offset.
    pub fn add_function(&mut self, name: impl Into<String>, unit: &CodeUnit) -> u32 {
        pad_to(&mut self.text, FUNCTION_ALIGN, INT3);
        let offset = self.text.len() as u32;
        self.text.extend_from_slice(&unit.code);
        for fixup in &unit.fixups {
            self.calls.push((offset + fixup.offset, fixup.symbol.clone()));
        }
        self.define(name.into(), Home::Text, offset);
        offset
    }

    /// Append initialized data aligned to `align`; returns its `.data` offset.
    pub fn add_data(&mut self, name: impl Into<String>, bytes: &[u8], align: u32) -> u32 {
        pad_to(&mut self.data, align as usize, 0);
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        self.define(name.into(), Home::Data, offset);
        offset
    }

    /// Reserve `size` zeroed bytes aligned to `align`; returns the `.bss` offset.
    pub fn reserve(&mut self, name: impl Into<String>, size: u32, align: u32) -> u32 {
        let align = align.max(1);
        let offset = self.bss.div_ceil(align) * align;
        self.bss = offset + size;
        self.define(name.into(), Home::Bss, offset);
        offset
    }

    fn define(&mut self, name: String, home: Home, offset: u32) {
        if self.definitions.contains_key(&name) {
            log::warn!("symbol {name} defined twice, keeping the first definition");
            return;
        }
        self.definitions.insert(name, Definition { home, offset });
    }

    pub fn finish(self) -> Result<Image, ImageError> {
        let mut builder = ImageBuilder::new(self.config);
        let text = builder.add_section(".text", self.text, TEXT);
        let data = (!self.data.is_empty()).then(|| builder.add_section(".data", self.data, DATA));
        let bss = (self.bss > 0).then(|| builder.add_zeroed(".bss", self.bss, BSS));

        let home = |h: Home| -> Option<SectionId> {
            match h {
                Home::Text => Some(text),
                Home::Data => data,
                Home::Bss => bss,
            }
        };

        let mut symbols: IndexMap<&str, SymbolId> = IndexMap::new();
        for (name, def) in &self.definitions {
            let kind = if def.home == Home::Text {
                IMAGE_SYM_DTYPE_FUNCTION
            } else {
                0
            };
            let id = builder.add_symbol(
                name.as_str(),
                def.offset,
                home(def.home),
                kind,
                IMAGE_SYM_CLASS_EXTERNAL,
            );
            symbols.insert(name.as_str(), id);
        }

        for (offset, symbol) in &self.calls {
            let id = match symbols.get(symbol.as_str()) {
                Some(&id) => id,
                None => {
                    let id = builder.add_symbol(
                        symbol.as_str(),
                        0,
                        None,
                        IMAGE_SYM_DTYPE_FUNCTION,
                        IMAGE_SYM_CLASS_EXTERNAL,
                    );
                    symbols.insert(symbol.as_str(), id);
                    id
                }
            };
            builder.add_relocation(text, *offset, id, IMAGE_REL_AMD64_REL32)?;
        }

        log::debug!(
            "object: {} definitions, {} call relocations",
            self.definitions.len(),
            self.calls.len()
        );

        builder.build()
    }
}
