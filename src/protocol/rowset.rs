//! Tabular query results
//!
//! A [`Rowset`] is produced either from a single `*` frame or by reassembling
//! a stream of `/` chunk frames through [`RowsetBuilder`]:
//! - `begin` opens the rowset with the metadata carried by chunk 1
//! - `append_chunk` adds the rows of every chunk, in arrival order
//! - `finish` validates `cells.len() == rows * columns` and freezes it

use serde_json::{Map, Value as JsonValue};

use super::error::{DriverError, Result};
use super::frame::Frame;

/// Per-column metadata.
///
/// Only `name` is sent for version 1 rowsets; the other fields are filled
/// in for version 2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub decl_type: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub origin_column: Option<String>,
    pub not_null: Option<bool>,
    pub primary_key: Option<bool>,
    pub auto_increment: Option<bool>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Immutable tabular result, cells stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Rowset {
    version: u8,
    columns: Vec<ColumnMetadata>,
    row_count: usize,
    cells: Vec<Frame>,
}

impl Rowset {
    pub fn metadata_version(&self) -> u8 {
        self.version
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn cells(&self) -> &[Frame] {
        &self.cells
    }

    /// First column with exactly this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&Frame> {
        if row >= self.row_count || column >= self.columns.len() {
            return None;
        }
        self.cells.get(row * self.columns.len() + column)
    }

    pub fn get_by_name(&self, row: usize, column: &str) -> Option<&Frame> {
        self.get(row, self.column_index(column)?)
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        if index >= self.row_count {
            return None;
        }
        let width = self.columns.len();
        Some(Row {
            rowset: self,
            index,
            cells: &self.cells[index * width..(index + 1) * width],
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.row_count).filter_map(move |i| self.row(i))
    }

    /// Copy of rows `start..end`, clamped to the available rows.
    pub fn slice(&self, start: usize, end: usize) -> Rowset {
        let end = end.min(self.row_count);
        let start = start.min(end);
        let width = self.columns.len();
        Rowset {
            version: self.version,
            columns: self.columns.clone(),
            row_count: end - start,
            cells: self.cells[start * width..end * width].to_vec(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.rows().map(|row| row.to_json()).collect())
    }
}

/// Borrowed view of one row
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    rowset: &'a Rowset,
    index: usize,
    cells: &'a [Frame],
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, column: usize) -> Option<&'a Frame> {
        self.cells.get(column)
    }

    pub fn get_by_name(&self, column: &str) -> Option<&'a Frame> {
        self.cells.get(self.rowset.column_index(column)?)
    }

    pub fn values(&self) -> &'a [Frame] {
        self.cells
    }

    /// Object keyed by column name; a duplicated name keeps the last value.
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::with_capacity(self.cells.len());
        for (column, cell) in self.rowset.columns.iter().zip(self.cells) {
            obj.insert(column.name.clone(), cell.to_json());
        }
        JsonValue::Object(obj)
    }
}

/// Mutable rowset under construction
#[derive(Debug, Clone)]
pub struct RowsetBuilder {
    version: u8,
    columns: Vec<ColumnMetadata>,
    row_count: usize,
    cells: Vec<Frame>,
}

impl RowsetBuilder {
    pub fn begin(version: u8, columns: Vec<ColumnMetadata>) -> Self {
        Self {
            version,
            columns,
            row_count: 0,
            cells: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn append_chunk(&mut self, rows: usize, cells: Vec<Frame>) -> Result<()> {
        let expected = rows
            .checked_mul(self.columns.len())
            .ok_or_else(|| DriverError::protocol("rowset chunk dimensions overflow"))?;
        if cells.len() != expected {
            return Err(DriverError::ProtocolError(format!(
                "rowset chunk declares {} rows x {} columns but carries {} values",
                rows,
                self.columns.len(),
                cells.len()
            )));
        }
        self.row_count += rows;
        self.cells.extend(cells);
        Ok(())
    }

    pub fn finish(self) -> Result<Rowset> {
        if self.cells.len() != self.row_count * self.columns.len() {
            return Err(DriverError::ProtocolError(format!(
                "rowset has {} values, expected {}",
                self.cells.len(),
                self.row_count * self.columns.len()
            )));
        }
        Ok(Rowset {
            version: self.version,
            columns: self.columns,
            row_count: self.row_count,
            cells: self.cells,
        })
    }
}
