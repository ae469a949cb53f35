//! Compiled GNU MO catalogs and the lookup table built from them.
//!
//! Layout (little-endian, no hash table):
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | magic `0x950412de` |
//! | 4 | revision `0` |
//! | 8 | number of strings `N` |
//! | 12 | offset of original table |
//! | 16 | offset of translation table |
//! | 20 | hash table size `0` |
//! | 24 | hash table offset |
//!
//! Each table holds `N` `(length, offset)` pairs sorted by original string.
//! Context is encoded as `ctx\x04id`, plural forms as NUL-joined strings.

use super::catalog::{Catalog, Message};
use std::collections::HashMap;
use thiserror::Error;

const MAGIC: u32 = 0x950412de;
const MAGIC_SWAPPED: u32 = 0xde120495;
const HEADER_LEN: usize = 28;
const CONTEXT_SEPARATOR: char = '\u{4}';

#[derive(Error, Debug, PartialEq)]
pub enum MoError {
    #[error("Not an MO file")]
    BadMagic,
    #[error("Truncated MO file")]
    Truncated,
    #[error("MO string is not valid UTF-8")]
    Encoding,
}

fn message_key(message: &Message) -> String {
    let mut key = match &message.context {
        Some(context) => format!("{}{}{}", context, CONTEXT_SEPARATOR, message.id),
        None => message.id.clone(),
    };
    if let Some(plural) = &message.plural {
        key.push('\0');
        key.push_str(plural);
    }
    key
}

/// Serialize the translated messages of `catalog`. Fuzzy translations are
/// included only with `use_fuzzy`.
pub fn write(catalog: &Catalog, use_fuzzy: bool) -> Vec<u8> {
    let header: String = catalog
        .headers
        .iter()
        .map(|(k, v)| format!("{}: {}\n", k, v))
        .collect();
    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = vec![(Vec::new(), header.into_bytes())];
    for message in catalog.messages() {
        if !message.is_translated() || (message.is_fuzzy() && !use_fuzzy) {
            continue;
        }
        entries.push((
            message_key(message).into_bytes(),
            message.strings.join("\0").into_bytes(),
        ));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let count = entries.len();
    let originals_offset = HEADER_LEN;
    let translations_offset = originals_offset + count * 8;
    let mut data_offset = translations_offset + count * 8;

    let mut originals = Vec::with_capacity(count * 8);
    let mut translations = Vec::with_capacity(count * 8);
    let mut data = Vec::new();
    for (original, _) in &entries {
        push_pair(&mut originals, original.len(), data_offset);
        data.extend_from_slice(original);
        data.push(0);
        data_offset += original.len() + 1;
    }
    for (_, translation) in &entries {
        push_pair(&mut translations, translation.len(), data_offset);
        data.extend_from_slice(translation);
        data.push(0);
        data_offset += translation.len() + 1;
    }

    let mut out = Vec::with_capacity(data_offset);
    for word in [
        MAGIC,
        0,
        count as u32,
        originals_offset as u32,
        translations_offset as u32,
        0,
        data_offset as u32,
    ] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend(originals);
    out.extend(translations);
    out.extend(data);
    out
}

fn push_pair(table: &mut Vec<u8>, len: usize, offset: usize) {
    table.extend_from_slice(&(len as u32).to_le_bytes());
    table.extend_from_slice(&(offset as u32).to_le_bytes());
}

/// Read-only translation table for one locale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translations {
    messages: HashMap<String, Vec<String>>,
}

impl Translations {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_mo(bytes: &[u8]) -> Result<Self, MoError> {
        let magic = read_u32(bytes, 0, false)?;
        let swapped = match magic {
            MAGIC => false,
            MAGIC_SWAPPED => true,
            _ => return Err(MoError::BadMagic),
        };
        let count = read_u32(bytes, 8, swapped)? as usize;
        let originals = read_u32(bytes, 12, swapped)? as usize;
        let translations = read_u32(bytes, 16, swapped)? as usize;
        for table in [originals, translations] {
            let end = count
                .checked_mul(8)
                .and_then(|size| table.checked_add(size))
                .ok_or(MoError::Truncated)?;
            if end > bytes.len() {
                return Err(MoError::Truncated);
            }
        }

        let mut messages = HashMap::with_capacity(count);
        for i in 0..count {
            let original = read_string(bytes, originals + i * 8, swapped)?;
            let translation = read_string(bytes, translations + i * 8, swapped)?;
            if original.is_empty() {
                continue;
            }
            let id = original.split('\0').next().unwrap_or_default().to_string();
            messages.insert(id, translation.split('\0').map(str::to_string).collect());
        }
        Ok(Self { messages })
    }

    /// Build directly from a catalog, without an MO round trip.
    pub fn from_catalog(catalog: &Catalog, use_fuzzy: bool) -> Self {
        let messages = catalog
            .messages()
            .filter(|m| m.is_translated() && (use_fuzzy || !m.is_fuzzy()))
            .map(|m| {
                let key = match &m.context {
                    Some(context) => format!("{}{}{}", context, CONTEXT_SEPARATOR, m.id),
                    None => m.id.clone(),
                };
                (key, m.strings.clone())
            })
            .collect();
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn gettext(&self, id: &str) -> Option<&str> {
        self.messages
            .get(id)
            .and_then(|strings| strings.first())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn pgettext(&self, context: &str, id: &str) -> Option<&str> {
        let key = format!("{}{}{}", context, CONTEXT_SEPARATOR, id);
        self.messages
            .get(&key)
            .and_then(|strings| strings.first())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Plural lookup using the germanic rule `n != 1`.
    pub fn ngettext(&self, id: &str, n: u64) -> Option<&str> {
        let index = usize::from(n != 1);
        let strings = self.messages.get(id)?;
        strings
            .get(index)
            .or_else(|| strings.first())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

fn read_u32(bytes: &[u8], offset: usize, swapped: bool) -> Result<u32, MoError> {
    let chunk: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(MoError::Truncated)?;
    Ok(if swapped {
        u32::from_be_bytes(chunk)
    } else {
        u32::from_le_bytes(chunk)
    })
}

fn read_string(bytes: &[u8], table_entry: usize, swapped: bool) -> Result<&str, MoError> {
    let len = read_u32(bytes, table_entry, swapped)? as usize;
    let offset = read_u32(bytes, table_entry + 4, swapped)? as usize;
    let end = offset.checked_add(len).ok_or(MoError::Truncated)?;
    let slice = bytes.get(offset..end).ok_or(MoError::Truncated)?;
    std::str::from_utf8(slice).map_err(|_| MoError::Encoding)
}
