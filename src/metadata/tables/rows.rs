//! Typed views over the rows the patcher needs.
//!
//! Each `*Raw` struct mirrors one ECMA-335 row with heap indexes left unresolved. Name
//! lookups go through [`crate::metadata::streams::Strings`].

use crate::{
    metadata::tables::{CodedIndex, CodedIndexType, TableId, TableInfo},
    Result,
};

/// A row type that can be built from the column values of its table.
pub trait RowReadable: Sized {
    /// The table this row type belongs to
    const TABLE: TableId;

    /// Build the row from its column values, in schema order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a coded index cannot be decoded.
    fn from_columns(rid: u32, columns: &[u32], info: &TableInfo) -> Result<Self>;
}

/// Module table row (0x00).
#[derive(Debug, Clone)]
pub struct ModuleRaw {
    /// Row id
    pub rid: u32,
    /// `#Strings` index of the module name
    pub name: u32,
}

impl RowReadable for ModuleRaw {
    const TABLE: TableId = TableId::Module;

    fn from_columns(rid: u32, columns: &[u32], _info: &TableInfo) -> Result<Self> {
        Ok(ModuleRaw {
            rid,
            name: columns[1],
        })
    }
}

/// TypeRef table row (0x01).
#[derive(Debug, Clone)]
pub struct TypeRefRaw {
    /// Row id
    pub rid: u32,
    /// Module, assembly or enclosing type that defines the type
    pub resolution_scope: CodedIndex,
    /// `#Strings` index of the type name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
}

impl RowReadable for TypeRefRaw {
    const TABLE: TableId = TableId::TypeRef;

    fn from_columns(rid: u32, columns: &[u32], info: &TableInfo) -> Result<Self> {
        Ok(TypeRefRaw {
            rid,
            resolution_scope: info
                .decode_coded_index(columns[0], CodedIndexType::ResolutionScope)?,
            type_name: columns[1],
            type_namespace: columns[2],
        })
    }
}

/// TypeDef table row (0x02).
#[derive(Debug, Clone)]
pub struct TypeDefRaw {
    /// Row id
    pub rid: u32,
    /// `TypeAttributes`
    pub flags: u32,
    /// `#Strings` index of the type name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
    /// Base type
    pub extends: CodedIndex,
    /// First row of this type's run in the Field table
    pub field_list: u32,
    /// First row of this type's run in the MethodDef table
    pub method_list: u32,
}

impl RowReadable for TypeDefRaw {
    const TABLE: TableId = TableId::TypeDef;

    fn from_columns(rid: u32, columns: &[u32], info: &TableInfo) -> Result<Self> {
        Ok(TypeDefRaw {
            rid,
            flags: columns[0],
            type_name: columns[1],
            type_namespace: columns[2],
            extends: info.decode_coded_index(columns[3], CodedIndexType::TypeDefOrRef)?,
            field_list: columns[4],
            method_list: columns[5],
        })
    }
}

/// MethodDef table row (0x06).
#[derive(Debug, Clone)]
pub struct MethodDefRaw {
    /// Row id
    pub rid: u32,
    /// RVA of the method body, 0 for abstract, extern and runtime methods
    pub rva: u32,
    /// `MethodImplAttributes`
    pub impl_flags: u32,
    /// `MethodAttributes`
    pub flags: u32,
    /// `#Strings` index of the method name
    pub name: u32,
    /// `#Blob` index of the signature
    pub signature: u32,
    /// First row of this method's run in the Param table
    pub param_list: u32,
}

impl MethodDefRaw {
    /// Index of the RVA column.
    pub const RVA_COLUMN: usize = 0;
}

impl RowReadable for MethodDefRaw {
    const TABLE: TableId = TableId::MethodDef;

    fn from_columns(rid: u32, columns: &[u32], _info: &TableInfo) -> Result<Self> {
        Ok(MethodDefRaw {
            rid,
            rva: columns[0],
            impl_flags: columns[1],
            flags: columns[2],
            name: columns[3],
            signature: columns[4],
            param_list: columns[5],
        })
    }
}

/// MemberRef table row (0x0A).
#[derive(Debug, Clone)]
pub struct MemberRefRaw {
    /// Row id
    pub rid: u32,
    /// Parent type, module or method
    pub class: CodedIndex,
    /// `#Strings` index of the member name
    pub name: u32,
    /// `#Blob` index of the signature
    pub signature: u32,
}

impl RowReadable for MemberRefRaw {
    const TABLE: TableId = TableId::MemberRef;

    fn from_columns(rid: u32, columns: &[u32], info: &TableInfo) -> Result<Self> {
        Ok(MemberRefRaw {
            rid,
            class: info.decode_coded_index(columns[0], CodedIndexType::MemberRefParent)?,
            name: columns[1],
            signature: columns[2],
        })
    }
}

/// Assembly table row (0x20).
#[derive(Debug, Clone)]
pub struct AssemblyRaw {
    /// Row id
    pub rid: u32,
    /// Major version
    pub major_version: u32,
    /// Minor version
    pub minor_version: u32,
    /// Build number
    pub build_number: u32,
    /// Revision number
    pub revision_number: u32,
    /// `#Strings` index of the assembly name
    pub name: u32,
}

impl RowReadable for AssemblyRaw {
    const TABLE: TableId = TableId::Assembly;

    fn from_columns(rid: u32, columns: &[u32], _info: &TableInfo) -> Result<Self> {
        Ok(AssemblyRaw {
            rid,
            major_version: columns[1],
            minor_version: columns[2],
            build_number: columns[3],
            revision_number: columns[4],
            name: columns[7],
        })
    }
}

/// NestedClass table row (0x29).
#[derive(Debug, Clone)]
pub struct NestedClassRaw {
    /// Row id
    pub rid: u32,
    /// TypeDef row of the nested type
    pub nested_class: u32,
    /// TypeDef row of the enclosing type
    pub enclosing_class: u32,
}

impl RowReadable for NestedClassRaw {
    const TABLE: TableId = TableId::NestedClass;

    fn from_columns(rid: u32, columns: &[u32], _info: &TableInfo) -> Result<Self> {
        Ok(NestedClassRaw {
            rid,
            nested_class: columns[0],
            enclosing_class: columns[1],
        })
    }
}

/// MethodSpec table row (0x2B).
#[derive(Debug, Clone)]
pub struct MethodSpecRaw {
    /// Row id
    pub rid: u32,
    /// The generic method being instantiated
    pub method: CodedIndex,
    /// `#Blob` index of the instantiation signature
    pub instantiation: u32,
}

impl RowReadable for MethodSpecRaw {
    const TABLE: TableId = TableId::MethodSpec;

    fn from_columns(rid: u32, columns: &[u32], info: &TableInfo) -> Result<Self> {
        Ok(MethodSpecRaw {
            rid,
            method: info.decode_coded_index(columns[0], CodedIndexType::MethodDefOrRef)?,
            instantiation: columns[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ref() {
        let info = TableInfo::new(&[(TableId::TypeRef, 2)], 0);
        let row = MemberRefRaw::from_columns(3, &[0x11, 0x2A, 0x05], &info).unwrap();

        assert_eq!(row.rid, 3);
        assert_eq!(row.class.tag, TableId::TypeRef);
        assert_eq!(row.class.row, 2);
        assert_eq!(row.name, 0x2A);
    }

    #[test]
    fn method_spec() {
        let info = TableInfo::new(&[], 0);
        let row = MethodSpecRaw::from_columns(1, &[0x05, 0x30], &info).unwrap();

        assert_eq!(row.method.tag, TableId::MemberRef);
        assert_eq!(row.method.row, 2);
        assert_eq!(row.instantiation, 0x30);
    }

    #[test]
    fn type_def() {
        let info = TableInfo::new(&[], 0);
        let row = TypeDefRaw::from_columns(2, &[0x0010_0001, 0x20, 0x00, 0x05, 1, 1], &info)
            .unwrap();

        assert_eq!(row.type_name, 0x20);
        assert_eq!(row.extends.tag, TableId::TypeRef);
        assert_eq!(row.extends.row, 1);
        assert_eq!(row.method_list, 1);
    }
}
