//! COFF-style relocatable images.
//!
//! ```text
//! file header | section headers | relocations | symbols | string table
//! | pad to file alignment | section raw data (file-aligned, zero-padded)
//! ```
//!
//! Raw offsets and sizes are multiples of `file_alignment`. Virtual addresses
//! start at the header size rounded to `section_alignment` and advance by each
//! section's aligned virtual size. Zero-initialized sections take address
//! space but no file space.

mod builder;
pub mod format;
mod reader;
mod strings;


use serde::Deserialize;

use crate::error::ImageError;

pub use builder::{Image, ImageBuilder, Section, SectionId, SymbolId};
pub use format::{FileHeader, Relocation, SectionHeader, Symbol};
pub use strings::StringTable;

/// Image layout parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub file_alignment: u32,
    pub section_alignment: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            file_alignment: 0x200,
            section_alignment: 0x1000,
        }
    }
}

impl ImageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn file_alignment(mut self, value: u32) -> Self {
        self.file_alignment = value;
        self
    }

    pub fn section_alignment(mut self, value: u32) -> Self {
        self.section_alignment = value;
        self
    }

    /// Both alignments are powers of two and sections align at least as
    /// strictly as the file.
    pub fn validate(&self) -> Result<(), ImageError> {
        let ok = self.file_alignment.is_power_of_two()
            && self.section_alignment.is_power_of_two()
            && self.section_alignment >= self.file_alignment;
        if !ok {
            return Err(ImageError::BadAlignment {
                file: self.file_alignment,
                section: self.section_alignment,
            });
        }
        Ok(())
    }
}
