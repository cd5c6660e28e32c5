use super::row::{FieldMap, RowId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sparse pending edits keyed by row id. Never holds a full row, only the
/// fields the user touched since the last save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingOverlay {
    edits: BTreeMap<RowId, FieldMap>,
}

impl PendingOverlay {
    pub fn set_field(&mut self, row_id: &str, field: &str, value: Value) {
        self.edits
            .entry(row_id.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn set_many<'a, I>(&mut self, row_ids: I, field: &str, value: &Value)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for row_id in row_ids {
            self.set_field(row_id, field, value.clone());
        }
    }

    pub fn clear(&mut self) {
        self.edits.clear();
    }

    pub fn has(&self, row_id: &str) -> bool {
        self.edits.contains_key(row_id)
    }

    pub fn count(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn get(&self, row_id: &str) -> Option<&FieldMap> {
        self.edits.get(row_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &FieldMap)> {
        self.edits.iter()
    }

    pub fn discard_row(&mut self, row_id: &str) -> bool {
        self.edits.remove(row_id).is_some()
    }

    /// Drop every edit whose row fails `keep`. Returns how many rows were dropped.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.edits.len();
        self.edits.retain(|row_id, _| keep(row_id));
        before - self.edits.len()
    }

    pub fn take(&mut self) -> PendingOverlay {
        std::mem::take(self)
    }

    /// Merge an older generation of edits underneath this one: fields
    /// already present here win, missing ones are filled from `older`.
    pub fn absorb_older(&mut self, older: PendingOverlay) {
        for (row_id, fields) in older.edits {
            let slot = self.edits.entry(row_id).or_default();
            for (field, value) in fields {
                slot.entry(field).or_insert(value);
            }
        }
    }
}
