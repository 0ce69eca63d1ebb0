//! Tiny and fat method headers (ECMA-335 II.25.4.2 - II.25.4.3).

use crate::{
    file::io::{push_le, read_le, read_le_at},
    metadata::{method::MethodBodyFlags, token::Token},
    Result,
};

/// Size of a fat header in bytes.
pub const FAT_HEADER_SIZE: usize = 12;

/// Operand stack depth implied by a tiny header.
pub const TINY_MAX_STACK: u16 = 8;

/// Largest code size a tiny header can describe.
pub const TINY_MAX_CODE_SIZE: usize = 0x3F;

/// Parsed method header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHeader {
    /// `true` for the 12-byte fat format
    pub is_fat: bool,
    /// Size of the header in bytes
    pub header_size: usize,
    /// Size of the code that follows the header
    pub code_size: usize,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// StandAloneSig token of the locals signature, null if there are no locals
    pub local_var_sig_token: Token,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    /// Data sections follow the code
    pub more_sects: bool,
}

impl MethodHeader {
    /// Parse the header at the start of `data`, which must also contain the code.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown header format, or
    /// [`crate::Error::OutOfBounds`] if the code runs past `data`.
    pub fn read(data: &[u8]) -> Result<MethodHeader> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        let header = match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b11)) {
            MethodBodyFlags::TINY_FORMAT => MethodHeader {
                is_fat: false,
                header_size: 1,
                code_size: usize::from(first_byte >> 2),
                max_stack: TINY_MAX_STACK,
                local_var_sig_token: Token::new(0),
                init_locals: false,
                more_sects: false,
            },
            MethodBodyFlags::FAT_FORMAT => {
                let mut cursor = 0;
                let first_duo = read_le_at::<u16>(data, &mut cursor)?;
                let max_stack = read_le_at::<u16>(data, &mut cursor)?;
                let code_size = read_le_at::<u32>(data, &mut cursor)? as usize;
                let local_var_sig_token = Token::new(read_le_at::<u32>(data, &mut cursor)?);

                let header_size = usize::from(first_duo >> 12) * 4;
                if header_size != FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Unexpected fat header size - {}",
                        header_size
                    ));
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                MethodHeader {
                    is_fat: true,
                    header_size,
                    code_size,
                    max_stack,
                    local_var_sig_token,
                    init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    more_sects: flags.contains(MethodBodyFlags::MORE_SECTS),
                }
            }
            _ => {
                return Err(malformed_error!(
                    "MethodHeader is neither FAT nor TINY - {}",
                    first_byte
                ))
            }
        };

        match header.header_size.checked_add(header.code_size) {
            Some(end) if end <= data.len() => Ok(header),
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Offset of the code within the body.
    #[must_use]
    pub fn code_range(&self) -> std::ops::Range<usize> {
        self.header_size..self.header_size + self.code_size
    }
}

/// Append a method header to `out`, picking the tiny format whenever the body allows it.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `code_size` exceeds the fat format's range.
pub fn write_header(
    out: &mut Vec<u8>,
    code_size: usize,
    max_stack: u16,
    local_var_sig_token: Token,
    init_locals: bool,
    more_sects: bool,
) -> Result<()> {
    let tiny = code_size <= TINY_MAX_CODE_SIZE
        && max_stack <= TINY_MAX_STACK
        && local_var_sig_token.is_null()
        && !init_locals
        && !more_sects;

    if tiny {
        #[allow(clippy::cast_possible_truncation)]
        out.push(((code_size as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
        return Ok(());
    }

    let code_size = u32::try_from(code_size)
        .map_err(|_| malformed_error!("Method code too large - {}", code_size))?;

    let mut flags = MethodBodyFlags::FAT_FORMAT;
    flags.set(MethodBodyFlags::INIT_LOCALS, init_locals);
    flags.set(MethodBodyFlags::MORE_SECTS, more_sects);

    #[allow(clippy::cast_possible_truncation)]
    let size_dwords = (FAT_HEADER_SIZE / 4) as u16;
    push_le(out, flags.bits() | (size_dwords << 12));
    push_le(out, max_stack);
    push_le(out, code_size);
    push_le(out, local_var_sig_token.value());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        let data = [0x0A, 0x00, 0x2A];
        let header = MethodHeader::read(&data).unwrap();

        assert!(!header.is_fat);
        assert_eq!(header.code_size, 2);
        assert_eq!(header.max_stack, 8);
        assert_eq!(header.code_range(), 1..3);

        let mut out = Vec::new();
        write_header(&mut out, 2, 8, Token::new(0), false, false).unwrap();
        assert_eq!(out, [0x0A]);
    }

    #[test]
    fn fat() {
        #[rustfmt::skip]
        let data = [
            0x1B, 0x30, 0x05, 0x00, // fat, init locals, more sects, max stack 5
            0x01, 0x00, 0x00, 0x00, // 1 byte of code
            0x02, 0x00, 0x00, 0x11, // StandAloneSig 2
            0x2A,
        ];

        let header = MethodHeader::read(&data).unwrap();
        assert!(header.is_fat);
        assert!(header.init_locals);
        assert!(header.more_sects);
        assert_eq!(header.max_stack, 5);
        assert_eq!(header.code_size, 1);
        assert_eq!(header.local_var_sig_token, Token::new(0x1100_0002));

        let mut out = Vec::new();
        write_header(&mut out, 1, 5, Token::new(0x1100_0002), true, true).unwrap();
        assert_eq!(out, data[..12]);
    }

    #[test]
    fn promotes_to_fat() {
        // Too deep a stack for tiny
        let mut out = Vec::new();
        write_header(&mut out, 2, 9, Token::new(0), false, false).unwrap();
        assert_eq!(out.len(), FAT_HEADER_SIZE);

        // Too much code for tiny
        let mut out = Vec::new();
        write_header(&mut out, 64, 8, Token::new(0), false, false).unwrap();
        assert_eq!(out.len(), FAT_HEADER_SIZE);
        assert_eq!(MethodHeader::read(&[out, vec![0; 64]].concat()).unwrap().code_size, 64);
    }

    #[test]
    fn invalid() {
        assert!(MethodHeader::read(&[]).is_err());
        // Neither tiny nor fat
        assert!(MethodHeader::read(&[0x01]).is_err());
        // Tiny header announcing more code than available
        assert!(MethodHeader::read(&[0x0E, 0x00]).is_err());
        // Fat header with a size of 2 dwords
        assert!(MethodHeader::read(&[0x03, 0x20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
