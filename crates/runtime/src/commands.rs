use keywatch_audit::{LogEntry, LogSettings};
use keywatch_keys::Snapshot;
use keywatch_sheets::{CleanupReport, ReconcileReport};
use serde::{Deserialize, Serialize};

use crate::Notification;
use crate::discover::DiscoveredFile;
use crate::pipeline::{ParseOutput, PipelineOutcome};
use crate::watcher::WatchState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub watch_path: Option<String>,
    pub watch_state: WatchState,
    pub remote_configured: bool,
    pub dungeon_count: usize,
    pub log_count: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientCommand {
    /// Watch `path`, or adopt the single discovered save file when `None`.
    SelectWatchPath { path: Option<String> },
    ScanForFiles,
    /// Parse the watched file without persisting anything.
    ManualParse,
    /// Parse, persist, and reconcile the watched file.
    Refresh,
    GetSnapshot,
    GetLogs,
    ClearLogs,
    GetLogSettings,
    ExportToRemote,
    CleanupRemote,
    GetAutostart,
    SetAutostart { enabled: bool },
    GetStartHidden,
    SetStartHidden { enabled: bool },
    RefreshDungeons,
    GetStatus,
    Ping,
    /// Keep the connection open and receive every [`Notification`].
    Subscribe,
    Quit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    Status(ServiceStatus),
    Selected { path: String, outcome: PipelineOutcome },
    Files(Vec<DiscoveredFile>),
    Parsed(ParseOutput),
    Pipeline(PipelineOutcome),
    Snapshot(Option<Snapshot>),
    Logs(Vec<LogEntry>),
    LogSettings(LogSettings),
    Exported(ReconcileReport),
    Cleaned(CleanupReport),
    Flag(bool),
    DungeonsRefreshed(usize),
    Notification(Notification),
    Ack(String),
    Error { title: String, message: String },
}
