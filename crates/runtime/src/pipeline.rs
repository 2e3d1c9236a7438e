//! The parse → dedupe → persist → reconcile stages.
//!
//! Each stage fully materializes its output before the next one starts.  The
//! service decides which stages a given operation runs and owns the audit
//! trail; the functions here only report what happened.

use std::path::Path;
use std::time::Duration;

use keywatch_config::AppConfig;
use keywatch_keys::{DungeonCatalog, Entry, ExtractOptions, Snapshot, SnapshotStore, dedupe, extract_entries};
use keywatch_sheets::{ReconcileReport, SheetRanges, SheetStore, SheetsError, reconcile};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Knobs for one run, captured from config when the run starts.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub options: ExtractOptions,
    pub max_entries: usize,
    pub remote_timeout: Duration,
    pub ranges: SheetRanges,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            options: ExtractOptions {
                default_week: config.watch.default_week,
                region: config.watch.region,
            },
            max_entries: config.watch.max_entries.max(1),
            remote_timeout: Duration::from_secs(config.sheets.timeout_secs.max(1)),
            ranges: SheetRanges::new(config.sheets.sheet_name.clone()),
        }
    }
}

/// Entries produced by the extract and dedupe stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOutput {
    pub entries: Vec<Entry>,
    /// Records extracted before the cap and dedupe were applied.
    pub extracted: usize,
    /// Candidate blocks dropped for missing fields.
    pub skipped_blocks: usize,
    /// Records dropped by the per-run cap.
    pub truncated: usize,
}

/// What the remote stage did during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOutcome {
    /// No destination sheet is configured.
    Skipped,
    Reconciled(ReconcileReport),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub snapshot: Snapshot,
    pub skipped_blocks: usize,
    pub truncated: usize,
    pub remote: RemoteOutcome,
}

pub async fn read_save_file(path: &Path) -> Result<String, PipelineError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|source| PipelineError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Extract, cap, then dedupe.
pub fn parse_text(text: &str, settings: &PipelineSettings, catalog: &DungeonCatalog) -> ParseOutput {
    let extraction = extract_entries(text, &settings.options, catalog);
    let extracted = extraction.entries.len();
    let mut entries = extraction.entries;

    let truncated = extracted.saturating_sub(settings.max_entries);
    if truncated > 0 {
        warn!(
            extracted,
            cap = settings.max_entries,
            "entry cap reached; truncating"
        );
        entries.truncate(settings.max_entries);
    }

    let entries = dedupe(entries);
    debug!(
        extracted,
        kept = entries.len(),
        skipped = extraction.skipped,
        "save file parsed"
    );
    ParseOutput {
        entries,
        extracted,
        skipped_blocks: extraction.skipped,
        truncated,
    }
}

pub async fn persist(store: &SnapshotStore, entries: Vec<Entry>) -> Result<Snapshot, PipelineError> {
    let snapshot = Snapshot::new(entries);
    store.write(&snapshot).await?;
    Ok(snapshot)
}

/// Reconcile under a deadline.  Expiry is reported as [`SheetsError::Timeout`];
/// whatever mutations landed before it stay applied.
pub async fn reconcile_with_timeout(
    remote: &dyn SheetStore,
    settings: &PipelineSettings,
    entries: &[Entry],
) -> Result<ReconcileReport, SheetsError> {
    match tokio::time::timeout(
        settings.remote_timeout,
        reconcile(remote, &settings.ranges, entries),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SheetsError::Timeout(settings.remote_timeout.as_secs())),
    }
}
