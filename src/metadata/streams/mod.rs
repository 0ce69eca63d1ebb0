//! Metadata streams.
//!
//! The metadata root lists its streams through [`StreamHeader`] entries. The patcher reads
//! identifiers from `#Strings`, string literals from `#US`, and rows from `#~`
//! ([`crate::metadata::tables`]). `#Blob` and `#GUID` are carried through unchanged.

mod streamheader;
pub use streamheader::StreamHeader;

mod strings;
pub use strings::Strings;

mod userstrings;
pub use userstrings::{UserStrings, UserStringsBuilder};
