//! String table and long-name encoding.
//!
//! The table starts with its own total size (4 bytes, included in the size)
//! followed by NUL-terminated strings. Offsets count from the start of the
//! size field, so the first string sits at offset 4.

use indexmap::IndexMap;

use crate::error::ImageError;

const SIZE_FIELD: u32 = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringTable {
    data: Vec<u8>,
    index: IndexMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of `s`, appending it on first use.
    pub fn insert(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.index.get(s) {
            return offset;
        }
        let offset = SIZE_FIELD + self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.index.insert(s.to_owned(), offset);
        offset
    }

    /// String starting at `offset`.
    pub fn get(&self, offset: u32) -> Option<&str> {
        let start = offset.checked_sub(SIZE_FIELD)? as usize;
        let rest = self.data.get(start..)?;
        let end = rest.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&rest[..end]).ok()
    }

    /// Total encoded size, including the size field.
    pub fn size(&self) -> u32 {
        SIZE_FIELD + self.data.len() as u32
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.index.iter().map(|(s, &o)| (s.as_str(), o))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        out.extend_from_slice(&self.size().to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Read a table starting at `at`.
    pub fn parse(bytes: &[u8], at: usize) -> Result<Self, ImageError> {
        let size = u32::from_le_bytes(super::format::record::<4>(bytes, at)?) as usize;
        if size < SIZE_FIELD as usize {
            return Err(ImageError::Truncated {
                at,
                need: SIZE_FIELD as usize,
            });
        }
        let data = bytes
            .get(at + 4..at + size)
            .ok_or(ImageError::Truncated { at, need: size })?
            .to_vec();

        let mut index = IndexMap::new();
        let mut offset = SIZE_FIELD;
        for chunk in data.split_inclusive(|&b| b == 0) {
            if let Some((0, text)) = chunk.split_last().map(|(l, t)| (*l, t))
                && let Ok(s) = std::str::from_utf8(text)
            {
                index.entry(s.to_owned()).or_insert(offset);
            }
            offset += chunk.len() as u32;
        }
        Ok(Self { data, index })
    }
}

fn check_name(name: &str) -> Result<(), ImageError> {
    if name.is_empty() || name.contains('\0') {
        return Err(ImageError::BadName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

fn inline(name: &str) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw[..name.len()].copy_from_slice(name.as_bytes());
    raw
}

/// Section header name: inline up to 8 bytes, else `/<offset>`.
pub(crate) fn encode_section_name(
    name: &str,
    strings: &mut StringTable,
) -> Result<[u8; 8], ImageError> {
    check_name(name)?;
    if name.len() <= 8 {
        return Ok(inline(name));
    }
    let reference = format!("/{}", strings.insert(name));
    if reference.len() > 8 {
        return Err(ImageError::BadName {
            name: name.to_owned(),
        });
    }
    Ok(inline(&reference))
}

/// Symbol name: inline up to 8 bytes, else zero prefix and offset.
pub(crate) fn encode_symbol_name(
    name: &str,
    strings: &mut StringTable,
) -> Result<[u8; 8], ImageError> {
    check_name(name)?;
    if name.len() <= 8 {
        return Ok(inline(name));
    }
    let mut raw = [0u8; 8];
    raw[4..].copy_from_slice(&strings.insert(name).to_le_bytes());
    Ok(raw)
}

fn trim(raw: &[u8; 8]) -> Result<String, ImageError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(8);
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| ImageError::BadName {
            name: String::from_utf8_lossy(&raw[..end]).into_owned(),
        })
}

pub(crate) fn decode_section_name(
    raw: &[u8; 8],
    strings: &StringTable,
) -> Result<String, ImageError> {
    let text = trim(raw)?;
    let Some(digits) = text.strip_prefix('/') else {
        return Ok(text);
    };
    digits
        .parse::<u32>()
        .ok()
        .and_then(|offset| strings.get(offset))
        .map(str::to_owned)
        .ok_or(ImageError::BadName { name: text })
}

pub(crate) fn decode_symbol_name(
    raw: &[u8; 8],
    strings: &StringTable,
) -> Result<String, ImageError> {
    if raw[..4] != [0; 4] {
        return trim(raw);
    }
    let offset = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    strings
        .get(offset)
        .map(str::to_owned)
        .ok_or(ImageError::BadName {
            name: format!("/{offset}"),
        })
}
