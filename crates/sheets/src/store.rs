use async_trait::async_trait;

use crate::SheetsError;

pub type Row = Vec<String>;

/// Range-addressed tabular store.  Ranges use A1 notation
/// (`Sheet1!A:E`, `Sheet1!A7:E7`, `Sheet1!A1`) and rows are 1-indexed.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Every non-empty row within `range`, top to bottom.
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetsError>;

    /// Overwrite the rectangle starting at the top-left of `range`.
    async fn update_range(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetsError>;

    async fn clear_range(&self, range: &str) -> Result<(), SheetsError>;

    /// Insert `rows` after the last non-empty row of `range`.
    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetsError>;
}

pub const FIRST_COLUMN: char = 'A';
pub const LAST_COLUMN: char = 'E';

/// A1 ranges for the five-column keystone layout on one sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRanges {
    sheet: String,
}

impl SheetRanges {
    pub fn new(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// All columns of the layout, every row.
    pub fn all(&self) -> String {
        format!("{}!{FIRST_COLUMN}:{LAST_COLUMN}", self.sheet)
    }

    pub fn row(&self, index: usize) -> String {
        format!("{}!{FIRST_COLUMN}{index}:{LAST_COLUMN}{index}", self.sheet)
    }

    pub fn origin(&self) -> String {
        format!("{}!{FIRST_COLUMN}1", self.sheet)
    }
}

/// First row number named by an A1 range, if the range names one.
/// `Sheet1!A7:E7` → 7, `Sheet1!A1` → 1, `Sheet1!A:E` → `None`.
pub fn range_start_row(range: &str) -> Option<usize> {
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let start = cells.split(':').next()?;
    let digits: String = start
        .chars()
        .skip_while(|c| c.is_ascii_alphabetic())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_render_a1_notation() {
        let ranges = SheetRanges::new("Sheet1");
        assert_eq!(ranges.all(), "Sheet1!A:E");
        assert_eq!(ranges.row(7), "Sheet1!A7:E7");
        assert_eq!(ranges.origin(), "Sheet1!A1");
    }

    #[test]
    fn start_row_parsing() {
        assert_eq!(range_start_row("Sheet1!A7:E7"), Some(7));
        assert_eq!(range_start_row("Sheet1!A1"), Some(1));
        assert_eq!(range_start_row("Keys!AB12:E40"), Some(12));
        assert_eq!(range_start_row("Sheet1!A:E"), None);
        assert_eq!(range_start_row("A3"), Some(3));
    }
}
