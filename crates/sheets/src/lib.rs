pub mod cleanup;
pub mod client;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod store;

pub use cleanup::{CleanupReport, cleanup_stale_rows, retain_recent};
pub use client::GoogleSheetsClient;
pub use error::SheetsError;
pub use memory::{MemorySheet, SheetCall};
pub use reconcile::{
    HEADER, ReconcilePlan, ReconcileReport, RowUpdate, entry_row, header_row, plan_reconcile,
    reconcile,
};
pub use store::{Row, SheetRanges, SheetStore};
