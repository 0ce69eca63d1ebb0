//! Method bodies: headers, exception handling sections and the decoded instruction
//! stream.
//!
//! # Key Components
//!
//! - [`MethodHeader`] - Tiny and fat header parsing, and [`write_header`]
//! - [`ExceptionClause`] - Raw exception handling clauses with byte offsets
//! - [`MethodBody`] - A decoded body that can be edited and encoded again

mod body;
mod exceptions;
mod header;
mod types;

pub use body::{ExceptionHandler, MethodBody};
pub use exceptions::{read_sections, write_section, ExceptionClause, ExceptionHandlerFlags};
pub use header::{write_header, MethodHeader, FAT_HEADER_SIZE, TINY_MAX_CODE_SIZE, TINY_MAX_STACK};
pub use types::*;
