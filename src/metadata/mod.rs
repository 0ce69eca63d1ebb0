//! Metadata parsing and rewriting for .NET assemblies.
//!
//! This module covers the parts of the ECMA-335 metadata that locating and patching a
//! method needs: the CLI header, the metadata root with its stream directory, the
//! `#Strings` and `#US` heaps, the compressed `#~` table stream and method bodies.
//!
//! # Key Components
//!
//! - [`cor20header`] - The CLI header that points at the metadata
//! - [`root`] - The metadata root (`BSJB`) and stream directory
//! - [`streams`] - Heap access, plus [`streams::UserStringsBuilder`] to grow `#US`
//! - [`tables`] - Table schema, row sizes and typed row access
//! - [`method`] - Method headers, exception sections and decoded bodies
//! - [`token`] - Metadata tokens

/// Implementation of the Header of CIL
pub mod cor20header;
/// Method headers, exception handling sections and decoded bodies
pub mod method;
/// Implementation of the root metadata structure
pub mod root;
/// Metadata heaps
pub mod streams;
/// The `#~` stream and its tables
pub mod tables;
/// Metadata tokens
pub mod token;
