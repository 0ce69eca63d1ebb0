//! The `#US` heap of string literals used by `ldstr`.
//!
//! Each entry is a compressed length, UTF-16LE code units, and one terminal byte. The
//! length counts the code unit bytes plus the terminal byte. The terminal byte is 1 when
//! any code unit needs more than plain 8-bit handling (ECMA-335 II.24.2.4).
//!
//! [`UserStrings`] reads an existing heap. [`UserStringsBuilder`] starts from an existing
//! heap and appends new literals, reusing entries that already hold the same text.

use std::collections::HashMap;

use widestring::{U16Str, U16String};

use crate::{
    file::{io::push_compressed_uint, parser::Parser},
    metadata::token::Token,
    Result,
};

/// Largest heap offset an `ldstr` token can address.
const MAX_HEAP_OFFSET: usize = 0x00FF_FFFF;

/// Read access to a `#US` heap.
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap the heap data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is empty or does not start with
    /// the mandatory empty entry.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Provided #US heap is empty"));
        }

        Ok(UserStrings { data })
    }

    /// Returns the code units of the entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry exceeds the heap.
    pub fn get_units(&self, index: usize) -> Result<Vec<u16>> {
        let (units, _) = self.read_entry(index)?;
        Ok(units)
    }

    /// Returns the entry at `index` as text. Unpaired surrogates are replaced.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry exceeds the heap.
    pub fn get(&self, index: usize) -> Result<String> {
        let units = self.get_units(index)?;
        Ok(U16Str::from_slice(&units).to_string_lossy())
    }

    /// Iterate `(offset, code units)` for every entry after the leading empty one.
    ///
    /// # Errors
    /// Each item fails with [`crate::Error::OutOfBounds`] once an entry runs past the heap;
    /// iteration stops after the first failure.
    pub fn iter(&self) -> impl Iterator<Item = Result<(usize, Vec<u16>)>> + '_ {
        let mut offset = 1;
        let mut failed = false;

        std::iter::from_fn(move || {
            if failed || offset >= self.data.len() {
                return None;
            }

            match self.read_entry(offset) {
                Ok((units, next)) => {
                    let entry = (offset, units);
                    offset = next;
                    Some(Ok(entry))
                }
                Err(error) => {
                    failed = true;
                    Some(Err(error))
                }
            }
        })
    }

    fn read_entry(&self, index: usize) -> Result<(Vec<u16>, usize)> {
        let mut parser = Parser::new(self.data);
        parser.seek(index)?;

        let length = parser.read_compressed_uint()? as usize;
        let bytes = parser.read_bytes(length)?;

        // The odd trailing byte is the terminal flag
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok((units, parser.pos()))
    }
}

/// Grows a `#US` heap with new literals.
pub struct UserStringsBuilder {
    data: Vec<u8>,
    lookup: HashMap<Vec<u16>, u32>,
    added: usize,
}

impl UserStringsBuilder {
    /// Start from the bytes of an existing heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] if the existing
    /// heap cannot be walked.
    pub fn new(existing: &[u8]) -> Result<UserStringsBuilder> {
        let heap = UserStrings::from(existing)?;

        let mut lookup = HashMap::new();
        for entry in heap.iter() {
            let (offset, units) = entry?;
            if units.is_empty() {
                continue;
            }

            #[allow(clippy::cast_possible_truncation)]
            lookup.entry(units).or_insert(offset as u32);
        }

        Ok(UserStringsBuilder {
            data: existing.to_vec(),
            lookup,
            added: 0,
        })
    }

    /// Returns the `ldstr` token for `value`, appending a new entry if no existing entry
    /// holds the same text.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the new entry would start beyond the range a
    /// token can address.
    pub fn intern(&mut self, value: &str) -> Result<Token> {
        let units = U16String::from_str(value).into_vec();
        if let Some(offset) = self.lookup.get(&units) {
            return Ok(Token::from_parts(Token::USER_STRING, *offset));
        }

        let offset = self.data.len();
        if offset > MAX_HEAP_OFFSET {
            return Err(malformed_error!(
                "#US heap offset {:#x} exceeds the token range",
                offset
            ));
        }

        let length = u32::try_from(units.len() * 2 + 1)
            .map_err(|_| malformed_error!("String literal too long - {} units", units.len()))?;
        push_compressed_uint(&mut self.data, length)?;
        for unit in &units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(u8::from(needs_terminal_flag(&units)));

        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as u32;
        self.lookup.insert(units, offset);
        self.added += 1;

        Ok(Token::from_parts(Token::USER_STRING, offset))
    }

    /// Returns how many entries were appended.
    #[must_use]
    pub fn added(&self) -> usize {
        self.added
    }

    /// Returns the heap bytes, padded to a multiple of 4.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let padded = crate::file::io::align_up(self.data.len(), 4);
        self.data.resize(padded, 0);
        self.data
    }
}

/// Terminal byte rule: set when any unit has a non-zero high byte or a low byte in
/// 0x01-0x08, 0x0E-0x1F, 0x27, 0x2D or 0x7F.
fn needs_terminal_flag(units: &[u16]) -> bool {
    units.iter().any(|unit| {
        let [low, high] = unit.to_le_bytes();
        high != 0 || matches!(low, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
    })
}
