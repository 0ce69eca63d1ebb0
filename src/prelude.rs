//! # cilpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilpatch library. Import this module to get quick access to everything a
//! patch run needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilpatch operations
pub use crate::Error;

/// The result type used throughout cilpatch
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Patching a module on disk or in memory
pub use crate::patch::{patch_file, patch_module, PatchConfig, PatchReport};

/// Reading and writing modules
pub use crate::module::{Module, ModuleStore, PeStore};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Module Graph
// ================================================================================================

/// Types and methods of a loaded module
pub use crate::module::{AssemblyIdentity, MethodDef, TypeDef};

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Decoded method bodies and their exception handlers
pub use crate::metadata::method::{ExceptionHandler, MethodBody};

// ================================================================================================
// Instructions
// ================================================================================================

/// The instruction arena and its elements
pub use crate::assembly::{InstrId, Instruction, InstructionList, OpCode, Operand};
