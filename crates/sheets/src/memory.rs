use std::sync::Mutex;

use async_trait::async_trait;

use crate::SheetsError;
use crate::store::{Row, SheetStore, range_start_row};

/// One recorded call against a [`MemorySheet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetCall {
    Read { range: String },
    Update { range: String, rows: Vec<Row> },
    Clear { range: String },
    Append { range: String, rows: Vec<Row> },
}

/// In-process [`SheetStore`] holding a single sheet's rows.  Records every
/// call so callers can assert on the exact mutations issued.
#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Mutex<Vec<Row>>,
    calls: Mutex<Vec<SheetCall>>,
    unavailable: Mutex<bool>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Row> {
        lock(&self.rows).clone()
    }

    pub fn calls(&self) -> Vec<SheetCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make every subsequent call fail as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    fn check(&self, call: SheetCall) -> Result<(), SheetsError> {
        lock(&self.calls).push(call);
        if *lock(&self.unavailable) {
            return Err(SheetsError::Unavailable("memory sheet offline".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SheetStore for MemorySheet {
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetsError> {
        self.check(SheetCall::Read {
            range: range.to_string(),
        })?;
        Ok(self.rows())
    }

    async fn update_range(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetsError> {
        self.check(SheetCall::Update {
            range: range.to_string(),
            rows: rows.clone(),
        })?;
        let start = range_start_row(range).ok_or_else(|| SheetsError::Rejected {
            status: 400,
            body: format!("update range {range} has no start row"),
        })?;
        let mut sheet = lock(&self.rows);
        for (offset, row) in rows.into_iter().enumerate() {
            let index = start - 1 + offset;
            if sheet.len() <= index {
                sheet.resize(index + 1, Vec::new());
            }
            sheet[index] = row;
        }
        Ok(())
    }

    async fn clear_range(&self, range: &str) -> Result<(), SheetsError> {
        self.check(SheetCall::Clear {
            range: range.to_string(),
        })?;
        lock(&self.rows).clear();
        Ok(())
    }

    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetsError> {
        self.check(SheetCall::Append {
            range: range.to_string(),
            rows: rows.clone(),
        })?;
        lock(&self.rows).extend(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn update_overwrites_in_place() {
        let sheet = MemorySheet::with_rows(vec![row(&["h"]), row(&["a"]), row(&["b"])]);
        sheet
            .update_range("Sheet1!A2:E2", vec![row(&["a2"])])
            .await
            .unwrap();
        assert_eq!(sheet.rows(), vec![row(&["h"]), row(&["a2"]), row(&["b"])]);
    }

    #[tokio::test]
    async fn append_and_clear() {
        let sheet = MemorySheet::new();
        sheet.append_rows("Sheet1!A:E", vec![row(&["x"])]).await.unwrap();
        assert_eq!(sheet.rows().len(), 1);
        sheet.clear_range("Sheet1!A:E").await.unwrap();
        assert!(sheet.rows().is_empty());
        assert_eq!(sheet.calls().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_sheet_fails_and_still_records() {
        let sheet = MemorySheet::new();
        sheet.set_unavailable(true);
        let err = sheet.read_range("Sheet1!A:E").await.unwrap_err();
        assert!(matches!(err, SheetsError::Unavailable(_)));
        assert_eq!(sheet.calls().len(), 1);
    }
}
