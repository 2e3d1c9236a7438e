//! The service object behind the control surface.
//!
//! One [`KeyService`] per process owns the audit log, the watch controller,
//! the snapshot store and the dungeon catalog.  The daemon hands an
//! `Arc<KeyService>` to every connection; watch-triggered runs reach it
//! through a weak reference so the controller does not keep it alive.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use keywatch_audit::{AuditLog, LogEntry, LogSettings, Severity};
use keywatch_config::AppConfig;
use keywatch_keys::{DungeonCatalog, Snapshot, SnapshotStore, parse_dungeon_table};
use keywatch_sheets::{
    CleanupReport, GoogleSheetsClient, ReconcileReport, SheetRanges, SheetStore, SheetsError,
    cleanup_stale_rows,
};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::Notification;
use crate::commands::ServiceStatus;
use crate::discover::{DiscoveredFile, scan_for_save_files};
use crate::error::PipelineError;
use crate::pipeline::{
    ParseOutput, PipelineOutcome, PipelineSettings, RemoteOutcome, parse_text, persist,
    read_save_file, reconcile_with_timeout,
};
use crate::single_flight::SingleFlight;
use crate::watcher::{RunFn, WatchController, WatchState};

/// Notification channel capacity.  Lagging subscribers lose the oldest events.
const BROADCAST_CAP: usize = 64;

pub struct KeyService {
    config: RwLock<AppConfig>,
    config_path: Option<PathBuf>,
    audit: Mutex<AuditLog>,
    store: SnapshotStore,
    catalog: RwLock<DungeonCatalog>,
    remote_override: Option<Arc<dyn SheetStore>>,
    gate: SingleFlight,
    /// Serializes read-plan-write cycles against the remote sheet.
    remote_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<WatchController>>,
    notify_tx: broadcast::Sender<Notification>,
    shutdown_tx: watch::Sender<bool>,
    started_at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(path: &Path) -> PipelineError {
    PipelineError::FileAccess {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "file does not exist"),
    }
}

impl KeyService {
    /// `config_path` is where preference and path changes are saved back;
    /// `None` keeps them in memory only.
    pub fn new(config: AppConfig, config_path: Option<PathBuf>) -> Self {
        let (notify_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            audit: Mutex::new(AuditLog::new(config.audit.capacity)),
            store: SnapshotStore::new(config.snapshot_path()),
            config: RwLock::new(config),
            config_path,
            catalog: RwLock::new(DungeonCatalog::builtin()),
            remote_override: None,
            gate: SingleFlight::new(),
            remote_lock: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
            notify_tx,
            shutdown_tx,
            started_at: Instant::now(),
        }
    }

    /// Route every remote call to `store` instead of the configured sheet.
    pub fn with_remote_store(mut self, store: Arc<dyn SheetStore>) -> Self {
        self.remote_override = Some(store);
        self
    }

    pub fn config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply `apply` in memory and to the config file.  The file copy is
    /// re-read first so values that only came from the environment are not
    /// written back.
    fn update_config(&self, apply: impl Fn(&mut AppConfig)) -> Result<()> {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut config);
        if let Some(path) = &self.config_path {
            let mut on_disk = AppConfig::load_file(path)
                .with_context(|| format!("reading config from {}", path.display()))?;
            apply(&mut on_disk);
            on_disk
                .save_to(path)
                .with_context(|| format!("saving config to {}", path.display()))?;
        }
        Ok(())
    }

    fn catalog(&self) -> DungeonCatalog {
        self.catalog
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, severity: Severity, message: impl Into<String>) {
        lock(&self.audit).record(severity, message);
    }

    fn fail(&self, err: &PipelineError) {
        let message = err.to_string();
        self.record(Severity::Error, format!("{}: {message}", err.title()));
        let _ = self.notify_tx.send(Notification::Failure {
            title: err.title().to_string(),
            message,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn watch_state(&self) -> WatchState {
        lock(&self.watcher)
            .as_ref()
            .map_or(WatchState::Idle, WatchController::state)
    }

    pub fn watched_path(&self) -> Option<PathBuf> {
        lock(&self.watcher)
            .as_ref()
            .and_then(|controller| controller.path().map(Path::to_path_buf))
    }

    pub fn status(&self) -> ServiceStatus {
        let config = self.config();
        ServiceStatus {
            watch_path: config.watch.watch_path().map(|p| p.display().to_string()),
            watch_state: self.watch_state(),
            remote_configured: self.remote_override.is_some() || config.remote_configured(),
            dungeon_count: self
                .catalog
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            log_count: lock(&self.audit).len(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    // ── Watch path ───────────────────────────────────────────────────────────

    /// Select the save file to watch, remember it, and run the pipeline once.
    ///
    /// With no path, discovery runs and a single match is adopted; zero or
    /// several matches leave the selection unchanged.
    pub async fn select_watch_path(
        self: &Arc<Self>,
        path: Option<PathBuf>,
    ) -> Result<(PathBuf, PipelineOutcome), PipelineError> {
        let path = match path {
            Some(path) => path,
            None => {
                let found = self.scan_for_files();
                match found.as_slice() {
                    [single] => single.path.clone(),
                    _ => {
                        let err = PipelineError::NoWatchPath;
                        self.record(
                            Severity::Warn,
                            format!(
                                "Found {} candidate save files; select one explicitly",
                                found.len()
                            ),
                        );
                        return Err(err);
                    }
                }
            }
        };

        if !path.is_file() {
            let err = not_found(&path);
            self.fail(&err);
            return Err(err);
        }

        let remembered = path.display().to_string();
        if let Err(err) = self.update_config(|config| config.watch.path = remembered.clone()) {
            warn!(?err, "failed to persist selected save file");
            self.record(Severity::Warn, format!("Could not save selected path: {err:#}"));
        }
        self.record(Severity::Info, format!("Selected save file {}", path.display()));

        self.arm_watcher(&path)?;
        let outcome = self.run_pipeline(&path).await?;
        Ok((path, outcome))
    }

    fn arm_watcher(self: &Arc<Self>, path: &Path) -> Result<(), PipelineError> {
        let debounce = Duration::from_millis(self.config().watch.debounce_ms);
        let weak: Weak<Self> = Arc::downgrade(self);
        let run: RunFn = Arc::new(move |path: PathBuf| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(service) = weak.upgrade() {
                    service.record(Severity::Info, format!("File changed: {}", path.display()));
                    // failures are audited and broadcast inside the run
                    let _ = service.run_pipeline(&path).await;
                }
            })
        });

        let mut slot = lock(&self.watcher);
        if let Some(previous) = slot.as_mut() {
            previous.stop();
        }
        let mut controller = WatchController::new(debounce, run);
        if let Err(err) = controller.start(path.to_path_buf()) {
            drop(slot);
            let err = PipelineError::FileAccess {
                path: path.to_path_buf(),
                source: io::Error::other(err.to_string()),
            };
            self.fail(&err);
            return Err(err);
        }
        *slot = Some(controller);
        Ok(())
    }

    /// Re-arm the remembered save file, if it still exists, and parse it once.
    pub async fn resume(self: &Arc<Self>) -> Option<PipelineOutcome> {
        let path = self.config().watch.watch_path()?;
        if !path.is_file() {
            self.record(
                Severity::Warn,
                format!("Remembered save file {} no longer exists", path.display()),
            );
            return None;
        }
        self.record(Severity::Info, format!("Resuming watch on {}", path.display()));
        if self.arm_watcher(&path).is_err() {
            return None;
        }
        self.run_pipeline(&path).await.ok()
    }

    pub fn scan_for_files(&self) -> Vec<DiscoveredFile> {
        let roots = self.config().watch.search_roots;
        let found = scan_for_save_files(&roots);
        self.record(
            Severity::Info,
            format!("Save file scan found {} file(s)", found.len()),
        );
        found
    }

    fn require_watch_path(&self) -> Result<PathBuf, PipelineError> {
        let Some(path) = self.config().watch.watch_path() else {
            let err = PipelineError::NoWatchPath;
            self.fail(&err);
            return Err(err);
        };
        if !path.is_file() {
            let err = not_found(&path);
            self.fail(&err);
            return Err(err);
        }
        Ok(path)
    }

    // ── Pipeline ─────────────────────────────────────────────────────────────

    /// Parse the watched file and return what would be stored, without
    /// writing anything.
    pub async fn manual_parse(&self) -> Result<ParseOutput, PipelineError> {
        let path = self.require_watch_path()?;
        let _guard = self.gate.acquire(&path).await;
        let settings = PipelineSettings::from_config(&self.config());
        let text = read_save_file(&path).await.inspect_err(|err| self.fail(err))?;
        let parsed = parse_text(&text, &settings, &self.catalog());
        self.record(
            Severity::Info,
            format!(
                "Manual parse of {} found {} keys",
                path.display(),
                parsed.entries.len()
            ),
        );
        Ok(parsed)
    }

    pub async fn refresh(&self) -> Result<PipelineOutcome, PipelineError> {
        let path = self.require_watch_path()?;
        self.run_pipeline(&path).await
    }

    /// Extract → dedupe → persist → reconcile for `path`, serialized per path.
    ///
    /// Local failures abort the run and are returned.  Remote failures are
    /// reported in the outcome; the local snapshot stays written.
    pub async fn run_pipeline(&self, path: &Path) -> Result<PipelineOutcome, PipelineError> {
        let _guard = self.gate.acquire(path).await;
        let config = self.config();
        let settings = PipelineSettings::from_config(&config);

        let text = read_save_file(path).await.inspect_err(|err| self.fail(err))?;
        let parsed = parse_text(&text, &settings, &self.catalog());
        if parsed.skipped_blocks > 0 {
            self.record(
                Severity::Debug,
                format!(
                    "Skipped {} block(s) without required fields",
                    parsed.skipped_blocks
                ),
            );
        }
        if parsed.truncated > 0 {
            self.record(
                Severity::Warn,
                format!(
                    "Entry cap of {} reached; {} entries truncated",
                    settings.max_entries, parsed.truncated
                ),
            );
        }

        if config.watch.watch_path().as_deref() != Some(path) {
            let err = PipelineError::Superseded {
                path: path.to_path_buf(),
            };
            self.record(Severity::Warn, err.to_string());
            return Err(err);
        }

        let snapshot = persist(&self.store, parsed.entries)
            .await
            .inspect_err(|err| self.fail(err))?;
        self.record(
            Severity::Info,
            format!("Saved {} keys to {}", snapshot.len(), self.store.path().display()),
        );
        let _ = self.notify_tx.send(Notification::KeysUpdated {
            count: snapshot.len(),
        });

        let remote = self.remote_stage(&config, &settings, &snapshot).await;
        Ok(PipelineOutcome {
            snapshot,
            skipped_blocks: parsed.skipped_blocks,
            truncated: parsed.truncated,
            remote,
        })
    }

    async fn remote_stage(
        &self,
        config: &AppConfig,
        settings: &PipelineSettings,
        snapshot: &Snapshot,
    ) -> RemoteOutcome {
        if self.remote_override.is_none() && !config.remote_configured() {
            self.record(Severity::Debug, "Remote sheet not configured; export skipped");
            return RemoteOutcome::Skipped;
        }
        match self.export_entries(config, settings, snapshot).await {
            Ok(report) => RemoteOutcome::Reconciled(report),
            Err(err) => RemoteOutcome::Failed(err.to_string()),
        }
    }

    fn remote(&self, config: &AppConfig) -> Result<Arc<dyn SheetStore>, SheetsError> {
        if let Some(store) = &self.remote_override {
            return Ok(store.clone());
        }
        Ok(Arc::new(GoogleSheetsClient::from_config(&config.sheets)?))
    }

    async fn export_entries(
        &self,
        config: &AppConfig,
        settings: &PipelineSettings,
        snapshot: &Snapshot,
    ) -> Result<ReconcileReport, PipelineError> {
        self.record(
            Severity::Info,
            format!("Exporting {} keys to the remote sheet", snapshot.len()),
        );
        let _remote = self.remote_lock.lock().await;
        let result = match self.remote(config) {
            Ok(remote) => reconcile_with_timeout(remote.as_ref(), settings, &snapshot.entries)
                .await
                .map_err(PipelineError::from),
            Err(err) => Err(PipelineError::from(err)),
        };
        match result {
            Ok(report) => {
                self.record(
                    Severity::Info,
                    format!(
                        "Remote sheet updated: {} updated, {} appended, {} unchanged",
                        report.updated, report.appended, report.skipped
                    ),
                );
                let _ = self.notify_tx.send(Notification::ExportSucceeded {
                    updated: report.updated,
                    appended: report.appended,
                });
                Ok(report)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    // ── Snapshot and remote ──────────────────────────────────────────────────

    pub async fn last_snapshot(&self) -> Result<Option<Snapshot>, PipelineError> {
        self.store.load().await.map_err(|err| {
            let err = PipelineError::from(err);
            self.fail(&err);
            err
        })
    }

    /// Reconcile the stored snapshot against the remote sheet.
    pub async fn export_to_remote(&self) -> Result<ReconcileReport, PipelineError> {
        let config = self.config();
        if self.remote_override.is_none() && !config.remote_configured() {
            let err = PipelineError::ConfigurationMissing(
                "sheets.spreadsheet_id is not set (or export KEYWATCH_SPREADSHEET_ID)".to_string(),
            );
            self.fail(&err);
            return Err(err);
        }
        let path = self.require_watch_path()?;
        let _guard = self.gate.acquire(&path).await;
        let Some(snapshot) = self.last_snapshot().await? else {
            let err = PipelineError::NoSnapshot;
            self.fail(&err);
            return Err(err);
        };
        let settings = PipelineSettings::from_config(&config);
        self.export_entries(&config, &settings, &snapshot).await
    }

    /// Drop remote rows more than one week old, keeping the header.
    pub async fn cleanup_remote(&self) -> Result<CleanupReport, PipelineError> {
        let config = self.config();
        let settings = PipelineSettings::from_config(&config);
        let ranges = SheetRanges::new(config.sheets.sheet_name.clone());
        self.record(Severity::Info, "Cleaning up stale rows in the remote sheet");

        let remote = self
            .remote(&config)
            .map_err(PipelineError::from)
            .inspect_err(|err| self.fail(err))?;
        let _remote = self.remote_lock.lock().await;
        let result = tokio::time::timeout(
            settings.remote_timeout,
            cleanup_stale_rows(remote.as_ref(), &ranges, config.watch.region, Utc::now()),
        )
        .await
        .unwrap_or(Err(SheetsError::Timeout(settings.remote_timeout.as_secs())))
        .map_err(PipelineError::from);

        match result {
            Ok(report) => {
                self.record(
                    Severity::Info,
                    format!(
                        "Remote cleanup removed {} stale row(s), kept {}",
                        report.removed, report.kept
                    ),
                );
                Ok(report)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    // ── Audit log ────────────────────────────────────────────────────────────

    pub fn audit_log(&self) -> Vec<LogEntry> {
        lock(&self.audit).entries()
    }

    pub fn clear_audit_log(&self) {
        lock(&self.audit).clear();
    }

    pub fn log_settings(&self) -> LogSettings {
        lock(&self.audit).settings()
    }

    // ── Preferences ──────────────────────────────────────────────────────────

    pub fn autostart(&self) -> bool {
        self.config().preferences.autostart
    }

    pub fn set_autostart(&self, enabled: bool) -> Result<()> {
        self.update_config(|config| config.preferences.autostart = enabled)?;
        self.record(Severity::Info, format!("Autostart set to {enabled}"));
        Ok(())
    }

    pub fn start_hidden(&self) -> bool {
        self.config().preferences.start_hidden
    }

    pub fn set_start_hidden(&self, enabled: bool) -> Result<()> {
        self.update_config(|config| config.preferences.start_hidden = enabled)?;
        self.record(Severity::Info, format!("Start hidden set to {enabled}"));
        Ok(())
    }

    // ── Dungeon table ────────────────────────────────────────────────────────

    /// Overlay dungeon names from the upstream table.  On any failure the
    /// current table is kept.
    pub async fn refresh_dungeons(&self) -> Result<usize> {
        let config = self.config();
        let url = config.dungeons.source_url.clone();
        let fetched = async {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.sheets.timeout_secs.max(1)))
                .build()?;
            let body = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            Ok::<String, anyhow::Error>(body)
        }
        .await;

        let body = match fetched {
            Ok(body) => body,
            Err(err) => {
                self.record(
                    Severity::Warn,
                    format!("Dungeon table fetch from {url} failed; keeping current table: {err:#}"),
                );
                return Err(err.context(format!("fetching dungeon table from {url}")));
            }
        };
        Ok(self.apply_dungeon_table(&body))
    }

    /// Merge a `Dungeons.lua` body into the catalog; returns names merged.
    pub fn apply_dungeon_table(&self, lua: &str) -> usize {
        let names = parse_dungeon_table(lua);
        if names.is_empty() {
            self.record(
                Severity::Warn,
                "Dungeon table had no recognizable entries; keeping current table",
            );
            return 0;
        }
        let merged = self
            .catalog
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .merge(names);
        self.record(Severity::Info, format!("Dungeon table refreshed with {merged} names"));
        merged
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Stop watching and signal the daemon loop to exit.
    pub fn quit(&self) {
        if let Some(mut controller) = lock(&self.watcher).take() {
            controller.stop();
        }
        self.record(Severity::Info, "Shutting down");
        info!("quit requested");
        self.shutdown_tx.send_replace(true);
    }
}
