use super::row::RowId;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    ids: BTreeSet<RowId>,
}

impl SelectionSet {
    /// Flip membership; returns whether the row is selected afterwards.
    pub fn toggle(&mut self, row_id: &str) -> bool {
        if self.ids.remove(row_id) {
            false
        } else {
            self.ids.insert(row_id.to_string());
            true
        }
    }

    pub fn select_all<'a, I>(&mut self, row_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ids.extend(row_ids.into_iter().map(str::to_string));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn is_selected(&self, row_id: &str) -> bool {
        self.ids.contains(row_id)
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.ids.len();
        self.ids.retain(|id| keep(id));
        before - self.ids.len()
    }
}
