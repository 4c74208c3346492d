//! Link extraction from spreadsheet cells.

use crate::google::SheetCell;

/// Collect one link per non-empty cell, row-major.
///
/// A cell's hyperlink annotation wins over its displayed text, so cells
/// showing a student's name but linking to their file still resolve.
pub fn links_from_cells(rows: &[Vec<SheetCell>]) -> Vec<String> {
    rows.iter()
        .flatten()
        .filter_map(SheetCell::reference)
        .map(str::to_string)
        .collect()
}
