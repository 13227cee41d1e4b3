use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub String);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Row = Vec<String>;

/// A tab to create along with a new table, with its header row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabSpec {
    pub name: String,
    pub headers: Row,
}

impl TabSpec {
    pub fn new(name: impl Into<String>, headers: &[&str]) -> Self {
        Self { name: name.into(), headers: headers.iter().map(|h| (*h).to_string()).collect() }
    }
}

/// Spreadsheet-like store. Row indexes are 0-based and include the header row,
/// so the first data row of a provisioned tab is index 1.
#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn read_rows(&self, table: &TableId, tab: &str) -> Result<Vec<Row>, StoreError>;

    async fn append_rows(&self, table: &TableId, tab: &str, rows: Vec<Row>)
        -> Result<(), StoreError>;

    /// Overwrites cells of one row starting at `first_column`.
    async fn update_cells(
        &self,
        table: &TableId,
        tab: &str,
        row_index: usize,
        first_column: usize,
        values: Row,
    ) -> Result<(), StoreError>;

    /// Removes rows `[start, end)` and shifts the remaining rows up.
    async fn delete_rows(
        &self,
        table: &TableId,
        tab: &str,
        start: usize,
        end: usize,
    ) -> Result<(), StoreError>;

    async fn create_table(&self, title: &str, tabs: Vec<TabSpec>) -> Result<TableId, StoreError>;
}
