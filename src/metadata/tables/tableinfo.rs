use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::{read_le_at, read_le_at_dyn},
    metadata::tables::{CodedIndex, CodedIndexType, TableId},
    Result,
};

/// Row count and index width of a single table.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// Number of rows
    pub rows: u32,
    /// Bits needed to address every row
    pub bits: u8,
    /// Whether simple indexes into this table are 4 bytes wide
    pub is_large: bool,
}

impl TableRowInfo {
    /// Creates the info for a table with `rows` rows.
    #[must_use]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Shape of one column in a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Constant-width integer of the given byte size
    Fixed(u8),
    /// Index into `#Strings`
    Str,
    /// Index into `#GUID`
    Guid,
    /// Index into `#Blob`
    Blob,
    /// Simple index into another table
    Table(TableId),
    /// Coded index into a family of tables
    Coded(CodedIndexType),
}

impl TableId {
    /// The column layout of this table (ECMA-335 II.22).
    #[must_use]
    pub fn columns(self) -> &'static [Column] {
        use Column::{Blob, Coded, Fixed, Guid, Str, Table};
        use CodedIndexType as C;

        match self {
            TableId::Module => &[Fixed(2), Str, Guid, Guid, Guid],
            TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
            TableId::TypeDef => &[
                Fixed(4),
                Str,
                Str,
                Coded(C::TypeDefOrRef),
                Table(TableId::Field),
                Table(TableId::MethodDef),
            ],
            TableId::FieldPtr => &[Table(TableId::Field)],
            TableId::Field => &[Fixed(2), Str, Blob],
            TableId::MethodPtr => &[Table(TableId::MethodDef)],
            TableId::MethodDef => &[Fixed(4), Fixed(2), Fixed(2), Str, Blob, Table(TableId::Param)],
            TableId::ParamPtr => &[Table(TableId::Param)],
            TableId::Param => &[Fixed(2), Fixed(2), Str],
            TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(C::TypeDefOrRef)],
            TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
            TableId::Constant => &[Fixed(1), Fixed(1), Coded(C::HasConstant), Blob],
            TableId::CustomAttribute => &[
                Coded(C::HasCustomAttribute),
                Coded(C::CustomAttributeType),
                Blob,
            ],
            TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
            TableId::DeclSecurity => &[Fixed(2), Coded(C::HasDeclSecurity), Blob],
            TableId::ClassLayout => &[Fixed(2), Fixed(4), Table(TableId::TypeDef)],
            TableId::FieldLayout => &[Fixed(4), Table(TableId::Field)],
            TableId::StandAloneSig => &[Blob],
            TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
            TableId::EventPtr => &[Table(TableId::Event)],
            TableId::Event => &[Fixed(2), Str, Coded(C::TypeDefOrRef)],
            TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
            TableId::PropertyPtr => &[Table(TableId::Property)],
            TableId::Property => &[Fixed(2), Str, Blob],
            TableId::MethodSemantics => &[
                Fixed(2),
                Table(TableId::MethodDef),
                Coded(C::HasSemantics),
            ],
            TableId::MethodImpl => &[
                Table(TableId::TypeDef),
                Coded(C::MethodDefOrRef),
                Coded(C::MethodDefOrRef),
            ],
            TableId::ModuleRef => &[Str],
            TableId::TypeSpec => &[Blob],
            TableId::ImplMap => &[
                Fixed(2),
                Coded(C::MemberForwarded),
                Str,
                Table(TableId::ModuleRef),
            ],
            TableId::FieldRVA => &[Fixed(4), Table(TableId::Field)],
            TableId::EncLog => &[Fixed(4), Fixed(4)],
            TableId::EncMap => &[Fixed(4)],
            TableId::Assembly => &[
                Fixed(4),
                Fixed(2),
                Fixed(2),
                Fixed(2),
                Fixed(2),
                Fixed(4),
                Blob,
                Str,
                Str,
            ],
            TableId::AssemblyProcessor => &[Fixed(4)],
            TableId::AssemblyOS => &[Fixed(4), Fixed(4), Fixed(4)],
            TableId::AssemblyRef => &[
                Fixed(2),
                Fixed(2),
                Fixed(2),
                Fixed(2),
                Fixed(4),
                Blob,
                Str,
                Str,
                Blob,
            ],
            TableId::AssemblyRefProcessor => &[Fixed(4), Table(TableId::AssemblyRef)],
            TableId::AssemblyRefOS => &[
                Fixed(4),
                Fixed(4),
                Fixed(4),
                Table(TableId::AssemblyRef),
            ],
            TableId::File => &[Fixed(4), Str, Blob],
            TableId::ExportedType => &[
                Fixed(4),
                Fixed(4),
                Str,
                Str,
                Coded(C::Implementation),
            ],
            TableId::ManifestResource => &[Fixed(4), Fixed(4), Str, Coded(C::Implementation)],
            TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
            TableId::GenericParam => &[Fixed(2), Fixed(2), Coded(C::TypeOrMethodDef), Str],
            TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
            TableId::GenericParamConstraint => &[
                Table(TableId::GenericParam),
                Coded(C::TypeDefOrRef),
            ],
        }
    }
}

/// Row counts of every table plus heap index widths. Together these fix the byte size
/// of every column.
#[derive(Clone, Default, Debug)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_indexes: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

impl TableInfo {
    /// Creates the info from per-table row counts and the `HeapSizes` byte.
    #[must_use]
    pub fn new(row_counts: &[(TableId, u32)], heap_sizes: u8) -> Self {
        let mut table_info = TableInfo {
            rows: vec![TableRowInfo::default(); TableId::COUNT],
            coded_indexes: vec![0; CodedIndexType::COUNT],
            is_large_index_str: heap_sizes & 0x01 != 0,
            is_large_index_guid: heap_sizes & 0x02 != 0,
            is_large_index_blob: heap_sizes & 0x04 != 0,
        };

        for (table_id, rows) in row_counts {
            table_info.rows[*table_id as usize] = TableRowInfo::new(*rows);
        }

        table_info.calculate_coded_index_bits();
        table_info
    }

    /// Returns the row info of `table`.
    #[must_use]
    pub fn get(&self, table: TableId) -> &TableRowInfo {
        &self.rows[table as usize]
    }

    /// Returns the number of rows in `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize].rows
    }

    /// Returns `true` if `#Strings` indexes are 4 bytes wide.
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.is_large_index_str
    }

    /// Returns `true` if `#Blob` indexes are 4 bytes wide.
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.is_large_index_blob
    }

    /// Byte size of a single column.
    #[must_use]
    pub fn column_size(&self, column: Column) -> usize {
        match column {
            Column::Fixed(size) => size as usize,
            Column::Str => Self::index_size(self.is_large_index_str),
            Column::Guid => Self::index_size(self.is_large_index_guid),
            Column::Blob => Self::index_size(self.is_large_index_blob),
            Column::Table(table) => Self::index_size(self.rows[table as usize].is_large),
            Column::Coded(coded) => Self::index_size(self.coded_indexes[coded as usize] > 16),
        }
    }

    /// Byte size of one row of `table`.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        table
            .columns()
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }

    /// Byte offset of column `index` within a row of `table`.
    #[must_use]
    pub fn column_offset(&self, table: TableId, index: usize) -> usize {
        table.columns()[..index]
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }

    /// Read one column value at `offset`, advancing past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the column exceeds `data`.
    pub fn read_column(&self, data: &[u8], offset: &mut usize, column: Column) -> Result<u32> {
        match column {
            Column::Fixed(1) => Ok(u32::from(read_le_at::<u8>(data, offset)?)),
            Column::Fixed(2) => Ok(u32::from(read_le_at::<u16>(data, offset)?)),
            Column::Fixed(_) => read_le_at::<u32>(data, offset),
            _ => read_le_at_dyn(data, offset, self.column_size(column) == 4),
        }
    }

    /// Split a raw coded index value into table and row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag is out of range.
    pub fn decode_coded_index(
        &self,
        value: u32,
        coded_index_type: CodedIndexType,
    ) -> Result<CodedIndex> {
        let tables = coded_index_type.tables();
        let tag_bits = coded_index_type.tag_bits();
        let tag_mask = (1 << tag_bits) - 1;

        let tag = value & tag_mask;
        let row = value >> tag_bits;

        match tables.get(tag as usize) {
            Some(table) => Ok(CodedIndex::new(*table, row)),
            None => Err(malformed_error!(
                "Invalid tag {} for coded index {:?}",
                tag,
                coded_index_type
            )),
        }
    }

    fn index_size(is_large: bool) -> usize {
        if is_large {
            4
        } else {
            2
        }
    }

    fn calculate_coded_index_bits(&mut self) {
        for coded_index in CodedIndexType::iter() {
            let max_bits = coded_index
                .tables()
                .iter()
                .map(|table| self.rows[*table as usize].bits)
                .max()
                .unwrap_or(1);

            self.coded_indexes[coded_index as usize] = max_bits + coded_index.tag_bits();
        }
    }
}
