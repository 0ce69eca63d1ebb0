//! Metadata tokens.
//!
//! A token is a 32-bit reference into metadata: the high byte names the table (or `0x70`
//! for the `#US` heap) and the low 24 bits hold the 1-based row or heap offset.

use std::fmt;

/// A metadata token such as `0x06000001` (first MethodDef row).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Table byte of TypeRef tokens
    pub const TYPE_REF: u8 = 0x01;
    /// Table byte of TypeDef tokens
    pub const TYPE_DEF: u8 = 0x02;
    /// Table byte of Field tokens
    pub const FIELD: u8 = 0x04;
    /// Table byte of MethodDef tokens
    pub const METHOD_DEF: u8 = 0x06;
    /// Table byte of MemberRef tokens
    pub const MEMBER_REF: u8 = 0x0A;
    /// Table byte of StandAloneSig tokens
    pub const STAND_ALONE_SIG: u8 = 0x11;
    /// Table byte of TypeSpec tokens
    pub const TYPE_SPEC: u8 = 0x1B;
    /// Table byte of MethodSpec tokens
    pub const METHOD_SPEC: u8 = 0x2B;
    /// Pseudo-table byte of `#US` heap tokens, as used by `ldstr`
    pub const USER_STRING: u8 = 0x70;

    /// Creates a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table byte and a row (or heap offset).
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row index (or heap offset for `#US` tokens).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the all-zero token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts() {
        let token = Token(0x0600_0001);
        assert_eq!(token.table(), Token::METHOD_DEF);
        assert_eq!(token.row(), 1);

        let token = Token::from_parts(Token::USER_STRING, 0x25);
        assert_eq!(token.value(), 0x7000_0025);

        let token = Token::from_parts(Token::MEMBER_REF, 0x0100_0002);
        assert_eq!(token.value(), 0x0A00_0002);
    }

    #[test]
    fn null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x0A00_0001).is_null());
    }

    #[test]
    fn formatting() {
        let token = Token(0x0A00_0003);
        assert_eq!(format!("{token}"), "0x0a000003");
        assert_eq!(
            format!("{token:?}"),
            "Token(0x0a000003, table: 0x0a, row: 3)"
        );
    }
}
