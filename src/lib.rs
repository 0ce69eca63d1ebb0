// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # cilpatch
//!
//! Load-time plugin injection for Unity games, done by rewriting the game's managed
//! assembly on disk. Built in pure Rust on top of an ECMA-335 reader and writer, it needs
//! neither Windows nor the .NET runtime.
//!
//! The game's `Starter.Awake` builds a `string[]` of extra assemblies and hands it to
//! `PluginManager.SetAdditionalAssemblies`. `cilpatch` grows that array and appends one
//! entry per requested plugin, so the game loads the plugins itself on startup:
//!
//! ```text
//! call   add_eventLogMessage
//! ldc.i4 n+1                  <- was ldc.i4.1
//! newarr string
//! ...                         existing element 0
//! dup                         -+
//! ldc.i4 i                     | once per entry, i = 1..n
//! ldstr  entry                 |
//! stelem.ref                  -+
//! call   SetAdditionalAssemblies
//! ```
//!
//! ## Features
//!
//! - **Exact anchors** - Each anchor must match exactly once, or the run fails before writing
//! - **Safe insertion** - Refuses to insert where a branch or exception handler enters
//! - **Faithful rewrite** - Branch offsets, handler ranges and stack bounds are recomputed
//! - **Atomic output** - The patched image is written to a temporary file and renamed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilpatch::prelude::*;
//! use std::path::Path;
//!
//! let config = PatchConfig::default().with_entries(["MyPlugin.dll"]);
//! let report = patch_file(
//!     &PeStore,
//!     Path::new("Cities_Data/Managed/Assembly-CSharp.dll"),
//!     Path::new("Cities_Data/Managed/Assembly-CSharp.mod.dll"),
//!     &config,
//! )?;
//! println!("{report}");
//! # Ok::<(), cilpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - PE container access, RVA mapping, little-endian IO
//! - [`metadata`] - CLI header, metadata root, heaps, tables and method bodies
//! - [`assembly`] - CIL opcodes, decoding into an instruction arena, re-encoding
//! - [`module`] - The loaded module graph, and writing it back as a PE image
//! - [`patch`] - Locating the anchors and rewriting the target method
//!
//! ### Testing
//!
//! Unit tests run against an image crafted in memory, so no game files are needed:
//!
//! ```bash
//! cargo test
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use cilpatch::prelude::*;
///
/// let module = Module::from_file("Assembly-CSharp.dll".as_ref())?;
/// for ty in module.types() {
///     println!("{}", ty.full_name());
/// }
/// # Ok::<(), cilpatch::Error>(())
/// ```
pub mod prelude;

/// PE image access and low-level byte handling
pub mod file;

/// CIL instructions based on ECMA-335
///
/// Decodes method code into an [`assembly::InstructionList`], where branch targets are
/// instruction ids instead of byte offsets, and encodes it back. This makes inserting
/// and replacing instructions safe: offsets are only computed again when encoding.
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{assembly::decode_instruction, file::parser::Parser};
///
/// let bytecode = &[0x00, 0x2A]; // nop, ret
/// let mut parser = Parser::new(bytecode);
/// let instruction = decode_instruction(&mut parser)?;
///
/// println!("Mnemonic: {}", instruction.opcode.mnemonic());
/// # Ok::<(), cilpatch::Error>(())
/// ```
pub mod assembly;

/// Definitions, parsing and rewriting of CIL metadata based on ECMA-335
pub mod metadata;

/// The loaded module graph and PE image writing
pub mod module;

/// Locating anchors and injecting entries into the target method
pub mod patch;

/// `cilpatch` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilpatch` Error type
///
/// # Example
///
/// ```rust,no_run
/// use cilpatch::{Error, Module};
///
/// match Module::from_file(std::path::Path::new("Assembly-CSharp.dll")) {
///     Ok(module) => println!("Loaded {}", module.name),
///     Err(Error::NotSupported) => println!("File format not supported"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Main entry points: patching a file through a store, or a module in memory.
pub use patch::{patch_file, patch_module, PatchConfig, PatchReport};

/// The module graph and its persistence.
pub use module::{Module, ModuleStore, PeStore};

/// Provides access to low-level file and memory parsing utilities.
pub use file::{parser::Parser, File};
