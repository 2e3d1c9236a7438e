use chrono::{DateTime, Utc};
use keywatch_config::Region;
use keywatch_keys::timestamp::week_of;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::SheetsError;
use crate::reconcile::row_timestamp;
use crate::store::{Row, SheetRanges, SheetStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
}

/// Rows surviving a cleanup pass: the header plus every row whose week is at
/// most one behind `current_week`.  Rows without a readable timestamp are
/// kept.
pub fn retain_recent(rows: &[Row], region: Region, current_week: i64) -> Vec<Row> {
    rows.iter()
        .enumerate()
        .filter(|(position, row)| {
            if *position == 0 {
                return true;
            }
            match row_timestamp(row) {
                Some(instant) => week_of(instant, region) >= current_week - 1,
                None => true,
            }
        })
        .map(|(_, row)| row.clone())
        .collect()
}

/// Remove rows more than one week behind `now`, preserving the header.
///
/// The sheet is only touched when something is removed; surviving rows are
/// rewritten from the top after the range is cleared.
pub async fn cleanup_stale_rows(
    store: &dyn SheetStore,
    ranges: &SheetRanges,
    region: Region,
    now: DateTime<Utc>,
) -> Result<CleanupReport, SheetsError> {
    let rows = store.read_range(&ranges.all()).await?;
    let current_week = week_of(now, region);
    let kept = retain_recent(&rows, region, current_week);
    let report = CleanupReport {
        removed: rows.len() - kept.len(),
        kept: kept.len().saturating_sub(1),
    };

    if report.removed == 0 {
        info!(kept = report.kept, "remote cleanup found nothing stale");
        return Ok(report);
    }

    store.clear_range(&ranges.all()).await?;
    store.update_range(&ranges.origin(), kept).await?;
    info!(
        removed = report.removed,
        kept = report.kept,
        current_week,
        "remote cleanup removed stale rows"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySheet, SheetCall};
    use crate::reconcile::{format_timestamp, header_row};
    use chrono::Duration;
    use keywatch_keys::timestamp::resolve;

    fn row(name: &str, ts: &str) -> Row {
        vec![
            name.to_string(),
            "10".to_string(),
            "Dungeon".to_string(),
            ts.to_string(),
            "guild".to_string(),
        ]
    }

    fn in_week(week: u64) -> String {
        format_timestamp(resolve(3600, week, Region::Eu))
    }

    #[tokio::test]
    async fn removes_rows_older_than_previous_week() {
        let now = resolve(7200, 420, Region::Eu);
        let sheet = MemorySheet::with_rows(vec![
            header_row(),
            row("Ancient", &in_week(410)),
            row("LastWeek", &in_week(419)),
            row("ThisWeek", &in_week(420)),
            row("TwoBack", &in_week(418)),
        ]);
        let report = cleanup_stale_rows(&sheet, &SheetRanges::new("Sheet1"), Region::Eu, now)
            .await
            .unwrap();
        assert_eq!(report, CleanupReport { removed: 2, kept: 2 });

        let names: Vec<_> = sheet.rows().into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(names, vec!["Character Name", "LastWeek", "ThisWeek"]);

        let calls = sheet.calls();
        assert!(matches!(&calls[1], SheetCall::Clear { range } if range == "Sheet1!A:E"));
        assert!(matches!(&calls[2], SheetCall::Update { range, .. } if range == "Sheet1!A1"));
    }

    #[tokio::test]
    async fn nothing_stale_means_no_writes() {
        let now = resolve(0, 420, Region::Eu) + Duration::hours(1);
        let sheet = MemorySheet::with_rows(vec![header_row(), row("Fresh", &in_week(420))]);
        let report = cleanup_stale_rows(&sheet, &SheetRanges::new("Sheet1"), Region::Eu, now)
            .await
            .unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(sheet.calls().len(), 1);
    }

    #[test]
    fn unreadable_timestamps_and_header_survive() {
        let rows = vec![header_row(), row("Odd", "n/a"), row("Old", &in_week(1))];
        let kept = retain_recent(&rows, Region::Eu, 420);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1][0], "Odd");
    }
}
