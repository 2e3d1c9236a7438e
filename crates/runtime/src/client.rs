use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use keywatch_audit::{LogEntry, LogSettings};
use keywatch_keys::Snapshot;
use keywatch_sheets::{CleanupReport, ReconcileReport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::warn;

use crate::discover::DiscoveredFile;
use crate::pipeline::{ParseOutput, PipelineOutcome};
use crate::{ClientCommand, Notification, ServerEvent, ServiceStatus};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

macro_rules! expect_event {
    ($event:expr, $pattern:pat => $value:expr) => {
        match $event {
            $pattern => Ok($value),
            ServerEvent::Error { title, message } => bail!("{title}: {message}"),
            other => bail!("unexpected daemon response: {other:?}"),
        }
    };
}

impl DaemonClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub async fn connect_with_backoff(&self, max_attempts: usize) -> Result<()> {
        let mut delay = Duration::from_millis(100);
        for attempt in 0..max_attempts.max(1) {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if attempt + 1 == max_attempts.max(1) {
                        return Err(err.into());
                    }
                    warn!(attempt, ?err, "daemon connect failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
            }
        }
        Ok(())
    }

    pub async fn select_watch_path(&self, path: Option<String>) -> Result<(String, PipelineOutcome)> {
        let event = self.request(ClientCommand::SelectWatchPath { path }).await?;
        expect_event!(event, ServerEvent::Selected { path, outcome } => (path, outcome))
    }

    pub async fn scan_for_files(&self) -> Result<Vec<DiscoveredFile>> {
        let event = self.request(ClientCommand::ScanForFiles).await?;
        expect_event!(event, ServerEvent::Files(files) => files)
    }

    pub async fn manual_parse(&self) -> Result<ParseOutput> {
        let event = self.request(ClientCommand::ManualParse).await?;
        expect_event!(event, ServerEvent::Parsed(parsed) => parsed)
    }

    pub async fn refresh(&self) -> Result<PipelineOutcome> {
        let event = self.request(ClientCommand::Refresh).await?;
        expect_event!(event, ServerEvent::Pipeline(outcome) => outcome)
    }

    pub async fn snapshot(&self) -> Result<Option<Snapshot>> {
        let event = self.request(ClientCommand::GetSnapshot).await?;
        expect_event!(event, ServerEvent::Snapshot(snapshot) => snapshot)
    }

    pub async fn logs(&self) -> Result<Vec<LogEntry>> {
        let event = self.request(ClientCommand::GetLogs).await?;
        expect_event!(event, ServerEvent::Logs(entries) => entries)
    }

    pub async fn clear_logs(&self) -> Result<()> {
        let event = self.request(ClientCommand::ClearLogs).await?;
        expect_event!(event, ServerEvent::Ack(_) => ())
    }

    pub async fn log_settings(&self) -> Result<LogSettings> {
        let event = self.request(ClientCommand::GetLogSettings).await?;
        expect_event!(event, ServerEvent::LogSettings(settings) => settings)
    }

    pub async fn export_to_remote(&self) -> Result<ReconcileReport> {
        let event = self.request(ClientCommand::ExportToRemote).await?;
        expect_event!(event, ServerEvent::Exported(report) => report)
    }

    pub async fn cleanup_remote(&self) -> Result<CleanupReport> {
        let event = self.request(ClientCommand::CleanupRemote).await?;
        expect_event!(event, ServerEvent::Cleaned(report) => report)
    }

    pub async fn autostart(&self) -> Result<bool> {
        let event = self.request(ClientCommand::GetAutostart).await?;
        expect_event!(event, ServerEvent::Flag(flag) => flag)
    }

    pub async fn set_autostart(&self, enabled: bool) -> Result<bool> {
        let event = self.request(ClientCommand::SetAutostart { enabled }).await?;
        expect_event!(event, ServerEvent::Flag(flag) => flag)
    }

    pub async fn start_hidden(&self) -> Result<bool> {
        let event = self.request(ClientCommand::GetStartHidden).await?;
        expect_event!(event, ServerEvent::Flag(flag) => flag)
    }

    pub async fn set_start_hidden(&self, enabled: bool) -> Result<bool> {
        let event = self.request(ClientCommand::SetStartHidden { enabled }).await?;
        expect_event!(event, ServerEvent::Flag(flag) => flag)
    }

    pub async fn refresh_dungeons(&self) -> Result<usize> {
        let event = self.request(ClientCommand::RefreshDungeons).await?;
        expect_event!(event, ServerEvent::DungeonsRefreshed(count) => count)
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let event = self.request(ClientCommand::GetStatus).await?;
        expect_event!(event, ServerEvent::Status(status) => status)
    }

    pub async fn ping(&self) -> Result<()> {
        let event = self.request(ClientCommand::Ping).await?;
        expect_event!(event, ServerEvent::Ack(_) => ())
    }

    pub async fn quit(&self) -> Result<()> {
        let event = self.request(ClientCommand::Quit).await?;
        expect_event!(event, ServerEvent::Ack(_) => ())
    }

    /// Forward daemon notifications to `tx` until the connection drops or the
    /// receiver is gone.
    pub async fn subscribe(&self, tx: mpsc::UnboundedSender<Notification>) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = serde_json::to_string(&ClientCommand::Subscribe)?;
        write_half.write_all(request.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line).await?;
            if bytes == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: ServerEvent = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(err) => {
                    warn!("subscribe: bad json: {err}");
                    continue;
                }
            };
            if let ServerEvent::Notification(notification) = event {
                if tx.send(notification).is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn request(&self, command: ClientCommand) -> Result<ServerEvent> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = serde_json::to_string(&command)?;
        write_half.write_all(request.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line).await?;
            if bytes == 0 {
                bail!("daemon closed the connection without replying");
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(line.trim())?);
        }
    }
}
