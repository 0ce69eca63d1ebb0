use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::{read_le, read_le_at},
    metadata::tables::{RowReadable, TableId, TableInfo},
    Result,
};

/// `HeapSizes` bit signalling an extra 4-byte field after the row counts.
const EXTRA_DATA: u8 = 0x40;

/// The parsed header of the `#~` stream plus the offset of every present table.
pub struct TablesHeader<'a> {
    /// Major version of the table schema
    pub major_version: u8,
    /// Minor version of the table schema
    pub minor_version: u8,
    /// Heap index width flags
    pub heap_sizes: u8,
    /// Bit vector of present tables
    pub valid: u64,
    /// Bit vector of sorted tables
    pub sorted: u64,
    /// Row counts and column widths
    pub info: TableInfo,
    data: &'a [u8],
    table_offsets: Vec<usize>,
}

impl<'a> TablesHeader<'a> {
    /// Parse the `#~` stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the stream is truncated, or
    /// [`crate::Error::Malformed`] if it references tables outside the ECMA-335 set.
    pub fn from(data: &'a [u8]) -> Result<TablesHeader<'a>> {
        if data.len() < 24 {
            return Err(out_of_bounds_error!());
        }

        let major_version = read_le::<u8>(&data[4..])?;
        let minor_version = read_le::<u8>(&data[5..])?;
        let heap_sizes = read_le::<u8>(&data[6..])?;
        let valid = read_le::<u64>(&data[8..])?;
        let sorted = read_le::<u64>(&data[16..])?;

        if valid >> TableId::COUNT != 0 {
            return Err(malformed_error!(
                "Tables stream references unknown tables - valid mask 0x{:016x}",
                valid
            ));
        }

        let mut offset = 24;
        let mut row_counts = Vec::with_capacity(TableId::COUNT);
        for table_id in TableId::iter() {
            if valid & (1 << table_id as u64) == 0 {
                continue;
            }

            let rows = read_le_at::<u32>(data, &mut offset)?;
            if rows > 0x00FF_FFFF {
                return Err(malformed_error!(
                    "Table {:?} has too many rows - {}",
                    table_id,
                    rows
                ));
            }
            row_counts.push((table_id, rows));
        }

        if heap_sizes & EXTRA_DATA != 0 {
            offset += 4;
        }

        let info = TableInfo::new(&row_counts, heap_sizes);

        let mut table_offsets = vec![0; TableId::COUNT];
        for table_id in TableId::iter() {
            table_offsets[table_id as usize] = offset;

            let table_size = info.row_size(table_id) * info.rows(table_id) as usize;
            offset = match offset.checked_add(table_size) {
                Some(end) if end <= data.len() => end,
                _ => return Err(out_of_bounds_error!()),
            };
        }

        Ok(TablesHeader {
            major_version,
            minor_version,
            heap_sizes,
            valid,
            sorted,
            info,
            data,
            table_offsets,
        })
    }

    /// Returns the number of tables present.
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Returns the number of rows in `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.info.rows(table)
    }

    /// Offset of row `rid` (1-based) of `table`, relative to the start of the stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `rid` is 0 or past the last row.
    pub fn row_offset(&self, table: TableId, rid: u32) -> Result<usize> {
        if rid == 0 || rid > self.rows(table) {
            return Err(out_of_bounds_error!());
        }

        Ok(self.table_offsets[table as usize] + (rid as usize - 1) * self.info.row_size(table))
    }

    /// Read all column values of row `rid` of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `rid` does not exist.
    pub fn read_row(&self, table: TableId, rid: u32) -> Result<Vec<u32>> {
        let mut offset = self.row_offset(table, rid)?;

        table
            .columns()
            .iter()
            .map(|column| self.info.read_column(self.data, &mut offset, *column))
            .collect()
    }

    /// Read row `rid` as the typed row `T`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `rid` does not exist, or
    /// [`crate::Error::Malformed`] if a coded index is invalid.
    pub fn get<T: RowReadable>(&self, rid: u32) -> Result<T> {
        let columns = self.read_row(T::TABLE, rid)?;
        T::from_columns(rid, &columns, &self.info)
    }

    /// Iterate every row of `T::TABLE` in order.
    pub fn iter<T: RowReadable>(&self) -> impl Iterator<Item = Result<T>> + '_ {
        (1..=self.rows(T::TABLE)).map(move |rid| self.get::<T>(rid))
    }
}
