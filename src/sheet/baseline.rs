use super::row::{Row, RowId};
use std::collections::HashMap;

/// Last server-confirmed snapshot of a row collection.
///
/// There is no partial update: confirmed changes only ever arrive through a
/// full `load`.
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    rows: Vec<Row>,
    index: HashMap<RowId, usize>,
    revision: String,
    generation: u64,
}

impl BaselineStore {
    /// Replace the snapshot. Rejects snapshots with a repeated `row_id` and
    /// leaves the current snapshot untouched in that case.
    pub fn load(&mut self, rows: Vec<Row>, revision: String) -> Result<(), RowId> {
        let mut index = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if index.insert(row.row_id.clone(), i).is_some() {
                return Err(row.row_id.clone());
            }
        }
        self.rows = rows;
        self.index = index;
        self.revision = revision;
        self.generation += 1;
        Ok(())
    }

    pub fn get(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.index.get(row_id).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, row_id: &str) -> bool {
        self.index.contains_key(row_id)
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Number of loads so far; zero means nothing was fetched yet.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
