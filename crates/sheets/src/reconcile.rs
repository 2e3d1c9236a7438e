//! Row-level reconciliation of a local snapshot against the remote sheet.
//!
//! The remote sheet is read once.  Each local entry either updates the row
//! already holding its character (only when the local timestamp is strictly
//! newer), is appended, or is skipped.  Updates are written first, one range
//! per row, followed by a single batch append.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use keywatch_keys::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::SheetsError;
use crate::store::{Row, SheetRanges, SheetStore};

pub const HEADER: [&str; 5] = ["Character Name", "Key Level", "Dungeon", "Timestamp", "Source"];

pub const COL_NAME: usize = 0;
pub const COL_TIMESTAMP: usize = 3;

pub fn header_row() -> Row {
    HEADER.iter().map(|cell| cell.to_string()).collect()
}

/// Render an entry in the sheet's column layout.
pub fn entry_row(entry: &Entry) -> Row {
    vec![
        entry.character_name.clone(),
        entry.key_level.to_string(),
        entry.dungeon_name.clone(),
        format_timestamp(entry.resolved_timestamp),
        entry.source_channel.label().to_string(),
    ]
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the timestamp column of a remote row.  `None` when the cell is
/// absent or not an RFC 3339 instant.
pub fn row_timestamp(row: &Row) -> Option<DateTime<Utc>> {
    let cell = row.get(COL_TIMESTAMP)?;
    DateTime::parse_from_rfc3339(cell.trim())
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

/// A single-row overwrite at a 1-indexed sheet row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub row: usize,
    pub values: Row,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub updates: Vec<RowUpdate>,
    pub appends: Vec<Row>,
    pub skipped: usize,
    /// The sheet is empty; the header row goes out ahead of the appends.
    pub write_header: bool,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.updates.is_empty() && self.appends.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub updated: usize,
    pub appended: usize,
    pub skipped: usize,
}

/// Decide the mutations needed to bring `existing` up to date with `entries`.
///
/// Remote rows are indexed by their first column; when the sheet already
/// holds duplicates for one name, the first occurrence is the one kept in
/// sync.  A remote row whose timestamp cell cannot be parsed is treated as
/// older than any local entry.  Repeated local names are planned once.
pub fn plan_reconcile(entries: &[Entry], existing: &[Row]) -> ReconcilePlan {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (position, row) in existing.iter().enumerate() {
        let Some(name) = row.get(COL_NAME) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        index.entry(name).or_insert(position);
    }

    let mut plan = ReconcilePlan {
        write_header: existing.is_empty(),
        ..ReconcilePlan::default()
    };
    let mut planned: HashSet<&str> = HashSet::new();

    for entry in entries {
        if !planned.insert(entry.character_name.as_str()) {
            plan.skipped += 1;
            continue;
        }
        match index.get(entry.character_name.as_str()) {
            None => plan.appends.push(entry_row(entry)),
            Some(&position) => {
                let newer = match row_timestamp(&existing[position]) {
                    Some(remote) => entry.resolved_timestamp > remote,
                    None => true,
                };
                if newer {
                    plan.updates.push(RowUpdate {
                        row: position + 1,
                        values: entry_row(entry),
                    });
                } else {
                    plan.skipped += 1;
                }
            }
        }
    }

    plan
}

/// Read the sheet, plan, then apply the plan.
///
/// Any store failure aborts the run and is returned as is.  Mutations
/// already applied before the failure stay in place.
pub async fn reconcile(
    store: &dyn SheetStore,
    ranges: &SheetRanges,
    entries: &[Entry],
) -> Result<ReconcileReport, SheetsError> {
    let existing = store.read_range(&ranges.all()).await?;
    let plan = plan_reconcile(entries, &existing);
    debug!(
        existing = existing.len(),
        updates = plan.updates.len(),
        appends = plan.appends.len(),
        skipped = plan.skipped,
        "reconcile plan ready"
    );

    let report = ReconcileReport {
        updated: plan.updates.len(),
        appended: plan.appends.len(),
        skipped: plan.skipped,
    };

    for update in plan.updates {
        store
            .update_range(&ranges.row(update.row), vec![update.values])
            .await?;
    }

    if !plan.appends.is_empty() {
        let mut rows = Vec::with_capacity(plan.appends.len() + 1);
        if plan.write_header {
            rows.push(header_row());
        }
        rows.extend(plan.appends);
        store.append_rows(&ranges.all(), rows).await?;
    }

    info!(
        updated = report.updated,
        appended = report.appended,
        skipped = report.skipped,
        "remote sheet reconciled"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySheet, SheetCall};
    use chrono::TimeZone;
    use keywatch_keys::SourceChannel;

    fn entry(name: &str, level: u32, at: DateTime<Utc>) -> Entry {
        Entry {
            character_name: name.to_string(),
            key_level: level,
            dungeon_id: 504,
            dungeon_name: "Darkflame Cleft".to_string(),
            raw_timestamp: 100,
            week: 419,
            resolved_timestamp: at,
            source_channel: SourceChannel::Guild,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 30, hour, 0, 0).unwrap()
    }

    fn remote(name: &str, ts: &str) -> Row {
        vec![
            name.to_string(),
            "5".to_string(),
            "Old".to_string(),
            ts.to_string(),
            "friends".to_string(),
        ]
    }

    fn ranges() -> SheetRanges {
        SheetRanges::new("Sheet1")
    }

    #[test]
    fn entry_row_follows_column_layout() {
        let row = entry_row(&entry("Aly-Realm", 12, at(8)));
        assert_eq!(
            row,
            vec![
                "Aly-Realm",
                "12",
                "Darkflame Cleft",
                "2025-07-30T08:00:00.000Z",
                "guild"
            ]
        );
        assert_eq!(row_timestamp(&row), Some(at(8)));
    }

    #[tokio::test]
    async fn cold_start_issues_one_append_and_no_updates() {
        let sheet = MemorySheet::new();
        let entries = vec![entry("A", 1, at(1)), entry("B", 2, at(2)), entry("C", 3, at(3))];
        let report = reconcile(&sheet, &ranges(), &entries).await.unwrap();
        assert_eq!(report.appended, 3);
        assert_eq!(report.updated, 0);

        let calls = sheet.calls();
        let appends: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                SheetCall::Append { rows, .. } => Some(rows.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(appends.len(), 1);
        assert!(!calls.iter().any(|c| matches!(c, SheetCall::Update { .. })));
        // header goes out in the same write
        assert_eq!(appends[0].len(), 4);
        assert_eq!(appends[0][0], header_row());
        assert_eq!(appends[0][1][0], "A");
    }

    #[tokio::test]
    async fn header_only_sheet_appends_exactly_the_entries() {
        let sheet = MemorySheet::with_rows(vec![header_row()]);
        let entries = vec![entry("A", 1, at(1)), entry("B", 2, at(2)), entry("C", 3, at(3))];
        reconcile(&sheet, &ranges(), &entries).await.unwrap();
        let appended: Vec<_> = sheet
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                SheetCall::Append { rows, .. } => Some(rows),
                _ => None,
            })
            .collect();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].len(), 3);
        assert_eq!(sheet.rows().len(), 4);
    }

    #[tokio::test]
    async fn mixed_state_updates_in_place_and_appends_new() {
        let sheet = MemorySheet::with_rows(vec![
            header_row(),
            remote("Stale", "2025-07-30T01:00:00.000Z"),
            remote("Current", "2025-07-30T09:00:00.000Z"),
        ]);
        let entries = vec![
            entry("Stale", 14, at(5)),
            entry("Current", 7, at(9)),
            entry("Fresh", 3, at(4)),
        ];
        let report = reconcile(&sheet, &ranges(), &entries).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                updated: 1,
                appended: 1,
                skipped: 1
            }
        );

        let calls = sheet.calls();
        let updates: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, SheetCall::Update { .. }))
            .collect();
        assert_eq!(updates.len(), 1);
        match updates[0] {
            SheetCall::Update { range, rows } => {
                assert_eq!(range, "Sheet1!A2:E2");
                assert_eq!(rows[0][1], "14");
            }
            _ => unreachable!(),
        }
        let appends: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                SheetCall::Append { rows, .. } => Some(rows),
                _ => None,
            })
            .collect();
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0].len(), 1);
        assert_eq!(appends[0][0][0], "Fresh");

        // the update lands before the append
        let update_pos = calls
            .iter()
            .position(|c| matches!(c, SheetCall::Update { .. }))
            .unwrap();
        let append_pos = calls
            .iter()
            .position(|c| matches!(c, SheetCall::Append { .. }))
            .unwrap();
        assert!(update_pos < append_pos);
    }

    #[tokio::test]
    async fn older_or_equal_local_entries_issue_no_mutations() {
        let sheet = MemorySheet::with_rows(vec![
            header_row(),
            remote("Equal", "2025-07-30T05:00:00.000Z"),
            remote("Newer", "2025-07-30T10:00:00.000Z"),
        ]);
        let entries = vec![entry("Equal", 9, at(5)), entry("Newer", 9, at(6))];
        let report = reconcile(&sheet, &ranges(), &entries).await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(sheet.calls().len(), 1);
        assert!(matches!(sheet.calls()[0], SheetCall::Read { .. }));
    }

    #[test]
    fn duplicate_remote_rows_sync_the_first_occurrence() {
        let existing = vec![
            header_row(),
            remote("Dup", "2025-07-30T01:00:00.000Z"),
            remote("Dup", "2025-07-30T02:00:00.000Z"),
        ];
        let plan = plan_reconcile(&[entry("Dup", 4, at(3))], &existing);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].row, 2);
        assert!(plan.appends.is_empty());
    }

    #[test]
    fn unparseable_remote_timestamp_is_overwritten() {
        let existing = vec![header_row(), remote("Odd", "last tuesday")];
        let plan = plan_reconcile(&[entry("Odd", 4, at(3))], &existing);
        assert_eq!(plan.updates.len(), 1);
    }

    #[test]
    fn repeated_local_names_are_planned_once() {
        let plan = plan_reconcile(&[entry("Twice", 2, at(1)), entry("Twice", 3, at(2))], &[]);
        assert_eq!(plan.appends.len(), 1);
        assert_eq!(plan.skipped, 1);
        assert!(plan.write_header);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let sheet = MemorySheet::new();
        sheet.set_unavailable(true);
        let err = reconcile(&sheet, &ranges(), &[entry("A", 1, at(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, SheetsError::Unavailable(_)));
    }
}
