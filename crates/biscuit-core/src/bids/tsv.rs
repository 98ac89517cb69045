//! Tab-separated metadata tables (`participants.tsv`, `*_scans.tsv`).
//!
//! Tables are kept as strings; empty cells are written as `n/a`.

use crate::config::BidsConfig;
use crate::metadata::atomic_write_bytes;
use crate::{BiscuitError, Result};
use std::collections::HashMap;
use std::path::Path;

/// An in-memory TSV table with a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsvTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TsvTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Read a table from disk. Short rows are padded with `n/a`.
    ///
    /// Blank cells past the last column are dropped. A row with values past
    /// the last column is an error.
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| tsv_error(e, path))?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| tsv_error(e, path))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| tsv_error(e, path))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            if let Some(extra) = record
                .iter()
                .skip(columns.len())
                .find(|cell| !cell.trim().is_empty())
            {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(BiscuitError::Tsv {
                    message: format!(
                        "line {} has {} fields for {} columns (extra value {:?})",
                        line,
                        record.len(),
                        columns.len(),
                        extra
                    ),
                    path: Some(path.to_path_buf()),
                });
            }
            let mut row: Vec<String> = record.iter().map(normalize_cell).collect();
            row.resize(columns.len(), BidsConfig::NOT_AVAILABLE.to_string());
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Serialize the table to TSV text.
    pub fn to_tsv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| normalize_cell(c)))?;
        }
        writer.into_inner().map_err(|e| BiscuitError::Tsv {
            message: e.to_string(),
            path: None,
        })
    }

    /// Write the table atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_tsv_bytes()?;
        atomic_write_bytes(path, &bytes, false)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Cell value, `None` when the column doesn't exist.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Index of the first row whose `column` equals `value`.
    pub fn find_row(&self, column: &str, value: &str) -> Option<usize> {
        let col = self.column_index(column)?;
        self.rows.iter().position(|r| r[col] == value)
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, column: &str) -> Vec<&str> {
        match self.column_index(column) {
            Some(col) => self.rows.iter().map(|r| r[col].as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Append a column filled with `default`. No-op if it already exists.
    pub fn add_column(&mut self, column: &str, default: &str) {
        if self.has_column(column) {
            return;
        }
        self.columns.push(column.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
    }

    pub fn set(&mut self, row: usize, column: &str, value: &str) -> Result<()> {
        let col = self.column_index(column).ok_or_else(|| BiscuitError::Tsv {
            message: format!("no column named {:?}", column),
            path: None,
        })?;
        let cells = self.rows.get_mut(row).ok_or_else(|| BiscuitError::Tsv {
            message: format!("row {} out of range", row),
            path: None,
        })?;
        cells[col] = value.to_string();
        Ok(())
    }

    /// Append a row given as `(column, value)` pairs. Unknown columns are
    /// added; unspecified cells are `n/a`.
    pub fn push_record(&mut self, record: &[(&str, &str)]) {
        for (column, _) in record {
            self.add_column(column, BidsConfig::NOT_AVAILABLE);
        }
        let mut row = vec![BidsConfig::NOT_AVAILABLE.to_string(); self.columns.len()];
        for (column, value) in record {
            if let Some(col) = self.column_index(column) {
                row[col] = normalize_cell(value);
            }
        }
        self.rows.push(row);
    }

    /// Replace the row whose `key` matches the record's key, or append.
    pub fn upsert_record(&mut self, key: &str, record: &[(&str, &str)]) -> Result<()> {
        let key_value = record
            .iter()
            .find(|(column, _)| *column == key)
            .map(|(_, value)| *value)
            .ok_or_else(|| BiscuitError::Tsv {
                message: format!("record has no {:?} value", key),
                path: None,
            })?;

        match self.find_row(key, key_value) {
            Some(row) => {
                for (column, value) in record {
                    self.add_column(column, BidsConfig::NOT_AVAILABLE);
                    self.set(row, column, value)?;
                }
            }
            None => self.push_record(record),
        }
        Ok(())
    }

    /// Concatenate `incoming` after `self` and drop duplicate `key` values,
    /// keeping the incoming (last) row. Columns are the union, existing
    /// columns first.
    pub fn merge_keep_last(&self, incoming: &TsvTable, key: &str) -> Result<TsvTable> {
        for table in [self, incoming] {
            if !table.has_column(key) {
                return Err(BiscuitError::Tsv {
                    message: format!("cannot merge on missing column {:?}", key),
                    path: None,
                });
            }
        }

        let mut merged = TsvTable::new(self.columns.iter().cloned());
        for column in &incoming.columns {
            merged.add_column(column, BidsConfig::NOT_AVAILABLE);
        }

        let mut all_rows = Vec::with_capacity(self.len() + incoming.len());
        for table in [self, incoming] {
            for row in &table.rows {
                all_rows.push(merged.conform_row(table, row));
            }
        }

        let key_col = merged.column_index(key).unwrap_or(0);
        let mut last_seen: HashMap<&str, usize> = HashMap::new();
        for (idx, row) in all_rows.iter().enumerate() {
            last_seen.insert(row[key_col].as_str(), idx);
        }
        let keep: Vec<bool> = all_rows
            .iter()
            .enumerate()
            .map(|(idx, row)| last_seen.get(row[key_col].as_str()) == Some(&idx))
            .collect();

        merged.rows = all_rows
            .into_iter()
            .zip(keep)
            .filter_map(|(row, keep)| keep.then_some(row))
            .collect();
        Ok(merged)
    }

    /// Copy of the table holding only rows whose `column` value passes `keep`.
    pub fn filter_rows(&self, column: &str, keep: impl Fn(&str) -> bool) -> TsvTable {
        let mut filtered = TsvTable::new(self.columns.iter().cloned());
        if let Some(col) = self.column_index(column) {
            filtered.rows = self
                .rows
                .iter()
                .filter(|row| keep(&row[col]))
                .cloned()
                .collect();
        }
        filtered
    }

    /// Stable sort on the given columns, compared left to right.
    pub fn sort_by_columns(&mut self, columns: &[&str]) {
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        self.rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| a[i].cmp(&b[i]))
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Reorder `row` from `source`'s column layout to this table's.
    fn conform_row(&self, source: &TsvTable, row: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| {
                source
                    .column_index(column)
                    .map(|i| row[i].clone())
                    .unwrap_or_else(|| BidsConfig::NOT_AVAILABLE.to_string())
            })
            .collect()
    }
}

/// Merge two `participants.tsv` tables, keeping incoming rows on conflict
/// and sorting by participant id.
pub fn merge_participants(existing: &TsvTable, incoming: &TsvTable) -> Result<TsvTable> {
    let mut merged = existing.merge_keep_last(incoming, BidsConfig::PARTICIPANT_ID_COLUMN)?;
    merged.sort_by_columns(&[BidsConfig::PARTICIPANT_ID_COLUMN]);
    Ok(merged)
}

/// Merge two `*_scans.tsv` tables on `filename`, sorted by acquisition time.
pub fn merge_scans(existing: &TsvTable, incoming: &TsvTable) -> Result<TsvTable> {
    let mut merged = existing.merge_keep_last(incoming, BidsConfig::FILENAME_COLUMN)?;
    merged.sort_by_columns(&[BidsConfig::ACQ_TIME_COLUMN, BidsConfig::FILENAME_COLUMN]);
    Ok(merged)
}

fn normalize_cell(cell: &str) -> String {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        BidsConfig::NOT_AVAILABLE.to_string()
    } else {
        trimmed.to_string()
    }
}

fn tsv_error(err: csv::Error, path: &Path) -> BiscuitError {
    BiscuitError::Tsv {
        message: err.to_string(),
        path: Some(path.to_path_buf()),
    }
}
