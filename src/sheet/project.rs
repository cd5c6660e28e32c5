use super::overlay::PendingOverlay;
use super::row::Row;
use std::borrow::Cow;

/// Merge the baseline with the overlay layers, oldest layer first.
///
/// Rows without a pending edit in any layer come back borrowed so a renderer
/// can tell they did not change.
pub fn project<'a>(baseline: &'a [Row], layers: &[&PendingOverlay]) -> Vec<Cow<'a, Row>> {
    baseline
        .iter()
        .map(|row| {
            let mut merged: Option<Row> = None;
            for layer in layers {
                let Some(changes) = layer.get(&row.row_id) else {
                    continue;
                };
                let target = merged.get_or_insert_with(|| row.clone());
                for (field, value) in changes {
                    target.fields.insert(field.clone(), value.clone());
                }
            }
            match merged {
                Some(row) => Cow::Owned(row),
                None => Cow::Borrowed(row),
            }
        })
        .collect()
}
