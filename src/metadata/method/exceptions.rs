//! Exception handling clauses as stored after a method's code (ECMA-335 II.25.4.6).
//!
//! Clauses come in a small form (12 bytes, 16-bit offsets, 8-bit lengths) and a fat form
//! (24 bytes, 32-bit everything). Reading accepts both; writing picks the small form when
//! every clause fits.

use bitflags::bitflags;

use crate::{
    file::{
        io::{push_le, read_le_at},
        parser::Parser,
    },
    metadata::method::SectionFlags,
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Kind of an exception handling clause
    pub struct ExceptionHandlerFlags: u16 {
        /// Typed catch clause
        const EXCEPTION = 0x0000;
        /// Filter clause
        const FILTER = 0x0001;
        /// Finally clause
        const FINALLY = 0x0002;
        /// Fault clause
        const FAULT = 0x0004;
    }
}

const SMALL_CLAUSE_SIZE: usize = 12;
const FAT_CLAUSE_SIZE: usize = 24;

/// One exception handling clause with byte offsets into the method's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionClause {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Offset of the protected block
    pub try_offset: u32,
    /// Length of the protected block
    pub try_length: u32,
    /// Offset of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Catch type token for typed clauses, filter offset for filter clauses, else 0
    pub class_token_or_filter: u32,
}

impl ExceptionClause {
    fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}

/// Parse the data sections that follow the code, starting at the aligned offset `start`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if a section runs past `data`, or
/// [`crate::Error::Malformed`] for a section that is not exception handling data.
pub fn read_sections(data: &[u8], start: usize) -> Result<Vec<ExceptionClause>> {
    let mut parser = Parser::new(data);
    parser.seek(start)?;

    let mut clauses = Vec::new();
    loop {
        parser.align(4)?;
        let section_start = parser.pos();

        let flags = SectionFlags::from_bits_truncate(parser.read_le::<u8>()?);
        if !flags.contains(SectionFlags::EHTABLE) {
            return Err(malformed_error!(
                "Unsupported method data section - {:?}",
                flags
            ));
        }

        let (section_size, clause_size) = if flags.contains(SectionFlags::FAT_FORMAT) {
            let low = u32::from(parser.read_le::<u16>()?);
            let high = u32::from(parser.read_le::<u8>()?);
            ((high << 16 | low) as usize, FAT_CLAUSE_SIZE)
        } else {
            let size = parser.read_le::<u8>()? as usize;
            parser.advance_by(2)?;
            (size, SMALL_CLAUSE_SIZE)
        };

        if section_size < 4 {
            return Err(malformed_error!(
                "Exception section too small - {}",
                section_size
            ));
        }

        let mut cursor = parser.pos();
        for _ in 0..(section_size - 4) / clause_size {
            let clause = if clause_size == FAT_CLAUSE_SIZE {
                #[allow(clippy::cast_possible_truncation)]
                let flags = read_le_at::<u32>(data, &mut cursor)? as u16;
                ExceptionClause {
                    flags: ExceptionHandlerFlags::from_bits_truncate(flags),
                    try_offset: read_le_at::<u32>(data, &mut cursor)?,
                    try_length: read_le_at::<u32>(data, &mut cursor)?,
                    handler_offset: read_le_at::<u32>(data, &mut cursor)?,
                    handler_length: read_le_at::<u32>(data, &mut cursor)?,
                    class_token_or_filter: read_le_at::<u32>(data, &mut cursor)?,
                }
            } else {
                ExceptionClause {
                    flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                        data,
                        &mut cursor,
                    )?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                    class_token_or_filter: read_le_at::<u32>(data, &mut cursor)?,
                }
            };
            clauses.push(clause);
        }

        parser.seek(section_start)?;
        parser.advance_by(section_size)?;

        if !flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
    }

    Ok(clauses)
}

/// Append a single exception handling section holding `clauses` to `out`, which must be
/// 4-byte aligned.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if there are too many clauses for one section.
#[allow(clippy::cast_possible_truncation)]
pub fn write_section(out: &mut Vec<u8>, clauses: &[ExceptionClause]) -> Result<()> {
    let small_size = 4 + clauses.len() * SMALL_CLAUSE_SIZE;
    let use_small =
        small_size <= usize::from(u8::MAX) && clauses.iter().all(ExceptionClause::fits_small);

    if use_small {
        out.push(SectionFlags::EHTABLE.bits());
        out.push(small_size as u8);
        push_le(out, 0u16);

        for clause in clauses {
            push_le(out, clause.flags.bits());
            push_le(out, clause.try_offset as u16);
            push_le(out, clause.try_length as u8);
            push_le(out, clause.handler_offset as u16);
            push_le(out, clause.handler_length as u8);
            push_le(out, clause.class_token_or_filter);
        }

        return Ok(());
    }

    let fat_size = 4 + clauses.len() * FAT_CLAUSE_SIZE;
    if fat_size > 0x00FF_FFFF {
        return Err(malformed_error!(
            "Too many exception clauses - {}",
            clauses.len()
        ));
    }

    out.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
    push_le(out, fat_size as u16);
    push_le(out, (fat_size >> 16) as u8);

    for clause in clauses {
        push_le(out, u32::from(clause.flags.bits()));
        push_le(out, clause.try_offset);
        push_le(out, clause.try_length);
        push_le(out, clause.handler_offset);
        push_le(out, clause.handler_length);
        push_le(out, clause.class_token_or_filter);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small() {
        #[rustfmt::skip]
        let data = [
            0x01, 0x10, 0x00, 0x00,         // EHTABLE, 16 bytes
            0x02, 0x00,                     // FINALLY
            0x01, 0x00, 0x05,               // try 1..6
            0x06, 0x00, 0x04,               // handler 6..10
            0x00, 0x00, 0x00, 0x00,
        ];

        let clauses = read_sections(&data, 0).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].flags, ExceptionHandlerFlags::FINALLY);
        assert_eq!(clauses[0].try_offset, 1);
        assert_eq!(clauses[0].try_length, 5);
        assert_eq!(clauses[0].handler_offset, 6);
        assert_eq!(clauses[0].handler_length, 4);

        let mut out = Vec::new();
        write_section(&mut out, &clauses).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn fat() {
        #[rustfmt::skip]
        let data = [
            0x41, 0x1C, 0x00, 0x00,         // EHTABLE | FAT, 28 bytes
            0x00, 0x00, 0x00, 0x00,         // EXCEPTION
            0x00, 0x00, 0x00, 0x00,         // try offset
            0x00, 0x01, 0x00, 0x00,         // try length 0x100
            0x00, 0x01, 0x00, 0x00,         // handler offset
            0x08, 0x00, 0x00, 0x00,         // handler length
            0x05, 0x00, 0x00, 0x01,         // catch TypeRef 5
        ];

        let clauses = read_sections(&data, 0).unwrap();
        assert_eq!(clauses[0].flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!(clauses[0].try_length, 0x100);
        assert_eq!(clauses[0].class_token_or_filter, 0x0100_0005);

        // A 256-byte try block does not fit the small form
        let mut out = Vec::new();
        write_section(&mut out, &clauses).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn aligned_start() {
        let mut data = vec![0xAA, 0xBB];
        data.extend_from_slice(&[0x00, 0x00]);
        data.extend_from_slice(&[0x01, 0x10, 0x00, 0x00]);
        data.extend_from_slice(&[0x00; 12]);

        let clauses = read_sections(&data, 2).unwrap();
        assert_eq!(clauses.len(), 1);
    }

    #[test]
    fn invalid() {
        assert!(read_sections(&[0x02, 0x10, 0x00, 0x00], 0).is_err());
        assert!(read_sections(&[0x01, 0x10, 0x00, 0x00, 0x00], 0).is_err());
    }
}
