//! The `#~` metadata tables stream.
//!
//! Every table present in an assembly affects where the tables after it begin, so row
//! sizes are computed for all ECMA-335 tables (II.22) from a column schema. Typed rows are
//! only materialized for the tables the patcher reads; everything else is skipped over
//! and copied verbatim on rewrite.
//!
//! # Key Components
//!
//! - [`TableId`] - Identifier of each metadata table, in stream order
//! - [`CodedIndexType`] / [`CodedIndex`] - Tagged references into a family of tables
//! - [`TableInfo`] - Row counts and index widths, which determine every row size
//! - [`TablesHeader`] - The parsed stream with row-level access
//! - [`RowReadable`] - Typed views over individual rows

mod codedindex;
mod header;
mod rows;
mod tableinfo;

pub use codedindex::{CodedIndex, CodedIndexType};
pub use header::TablesHeader;
pub use rows::{
    AssemblyRaw, MemberRefRaw, MethodDefRaw, MethodSpecRaw, ModuleRaw, NestedClassRaw,
    RowReadable, TypeDefRaw, TypeRefRaw,
};
pub use tableinfo::{Column, TableInfo, TableRowInfo};

use strum::{EnumCount, EnumIter};

/// Identifier of a metadata table. The discriminant is the table number, which is also
/// the bit position in the `Valid` mask and the high byte of its tokens.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, PartialOrd, Ord, EnumIter, EnumCount)]
#[repr(u8)]
pub enum TableId {
    /// The current module, always one row
    Module = 0x00,
    /// References to types defined in other modules or assemblies
    TypeRef = 0x01,
    /// Types defined in this module
    TypeDef = 0x02,
    /// Field indirection, only in unoptimized metadata
    FieldPtr = 0x03,
    /// Field definitions
    Field = 0x04,
    /// Method indirection, only in unoptimized metadata
    MethodPtr = 0x05,
    /// Method definitions, including the RVA of each body
    MethodDef = 0x06,
    /// Parameter indirection, only in unoptimized metadata
    ParamPtr = 0x07,
    /// Parameter definitions
    Param = 0x08,
    /// Interfaces implemented by a type
    InterfaceImpl = 0x09,
    /// References to fields and methods of other types
    MemberRef = 0x0A,
    /// Compile-time constant values
    Constant = 0x0B,
    /// Custom attribute instances
    CustomAttribute = 0x0C,
    /// Interop marshalling descriptors
    FieldMarshal = 0x0D,
    /// Declarative security permission sets
    DeclSecurity = 0x0E,
    /// Explicit packing and size of a type
    ClassLayout = 0x0F,
    /// Explicit field offsets
    FieldLayout = 0x10,
    /// Standalone signatures, e.g. local variables
    StandAloneSig = 0x11,
    /// Maps types to their event ranges
    EventMap = 0x12,
    /// Event indirection, only in unoptimized metadata
    EventPtr = 0x13,
    /// Event definitions
    Event = 0x14,
    /// Maps types to their property ranges
    PropertyMap = 0x15,
    /// Property indirection, only in unoptimized metadata
    PropertyPtr = 0x16,
    /// Property definitions
    Property = 0x17,
    /// Links events and properties to their accessor methods
    MethodSemantics = 0x18,
    /// Explicit method overrides
    MethodImpl = 0x19,
    /// References to other modules
    ModuleRef = 0x1A,
    /// Constructed type signatures
    TypeSpec = 0x1B,
    /// P/Invoke mappings
    ImplMap = 0x1C,
    /// Initial data of fields
    FieldRVA = 0x1D,
    /// Edit-and-continue log
    EncLog = 0x1E,
    /// Edit-and-continue token map
    EncMap = 0x1F,
    /// The assembly manifest, at most one row
    Assembly = 0x20,
    /// Unused processor information
    AssemblyProcessor = 0x21,
    /// Unused operating system information
    AssemblyOS = 0x22,
    /// Referenced assemblies
    AssemblyRef = 0x23,
    /// Unused processor information of references
    AssemblyRefProcessor = 0x24,
    /// Unused operating system information of references
    AssemblyRefOS = 0x25,
    /// Files of a multi-file assembly
    File = 0x26,
    /// Types forwarded to or exported from other modules
    ExportedType = 0x27,
    /// Embedded or linked resources
    ManifestResource = 0x28,
    /// Nesting of types inside their enclosing type
    NestedClass = 0x29,
    /// Generic parameters of types and methods
    GenericParam = 0x2A,
    /// Generic method instantiations
    MethodSpec = 0x2B,
    /// Constraints on generic parameters
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Returns the table number.
    #[must_use]
    pub fn number(self) -> u8 {
        self as u8
    }
}
