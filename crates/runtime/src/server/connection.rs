//! Unix domain socket connection handling and command dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::{ClientCommand, KeyService, ServerEvent};

fn error_event(err: &PipelineError) -> ServerEvent {
    ServerEvent::Error {
        title: err.title().to_string(),
        message: err.to_string(),
    }
}

fn anyhow_event(title: &str, err: &anyhow::Error) -> ServerEvent {
    ServerEvent::Error {
        title: title.to_string(),
        message: format!("{err:#}"),
    }
}

pub(super) async fn handle_connection(stream: UnixStream, service: Arc<KeyService>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    let command: ClientCommand = serde_json::from_str(line.trim())?;
    debug!(?command, "daemon command received");

    let reply = match command {
        // Persistent subscription: forwards every notification until the
        // client goes away.
        ClientCommand::Subscribe => {
            let mut rx = service.subscribe();
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        if send_event(&mut write_half, ServerEvent::Notification(notification))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(n, "subscribe client lagged; {n} notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            return Ok(());
        }
        ClientCommand::SelectWatchPath { path } => {
            match service.select_watch_path(path.map(PathBuf::from)).await {
                Ok((path, outcome)) => ServerEvent::Selected {
                    path: path.display().to_string(),
                    outcome,
                },
                Err(err) => error_event(&err),
            }
        }
        ClientCommand::ScanForFiles => ServerEvent::Files(service.scan_for_files()),
        ClientCommand::ManualParse => match service.manual_parse().await {
            Ok(parsed) => ServerEvent::Parsed(parsed),
            Err(err) => error_event(&err),
        },
        ClientCommand::Refresh => match service.refresh().await {
            Ok(outcome) => ServerEvent::Pipeline(outcome),
            Err(err) => error_event(&err),
        },
        ClientCommand::GetSnapshot => match service.last_snapshot().await {
            Ok(snapshot) => ServerEvent::Snapshot(snapshot),
            Err(err) => error_event(&err),
        },
        ClientCommand::GetLogs => ServerEvent::Logs(service.audit_log()),
        ClientCommand::ClearLogs => {
            service.clear_audit_log();
            ServerEvent::Ack("logs cleared".to_string())
        }
        ClientCommand::GetLogSettings => ServerEvent::LogSettings(service.log_settings()),
        ClientCommand::ExportToRemote => match service.export_to_remote().await {
            Ok(report) => ServerEvent::Exported(report),
            Err(err) => error_event(&err),
        },
        ClientCommand::CleanupRemote => match service.cleanup_remote().await {
            Ok(report) => ServerEvent::Cleaned(report),
            Err(err) => error_event(&err),
        },
        ClientCommand::GetAutostart => ServerEvent::Flag(service.autostart()),
        ClientCommand::SetAutostart { enabled } => match service.set_autostart(enabled) {
            Ok(()) => ServerEvent::Flag(enabled),
            Err(err) => anyhow_event("Saving preferences failed", &err),
        },
        ClientCommand::GetStartHidden => ServerEvent::Flag(service.start_hidden()),
        ClientCommand::SetStartHidden { enabled } => match service.set_start_hidden(enabled) {
            Ok(()) => ServerEvent::Flag(enabled),
            Err(err) => anyhow_event("Saving preferences failed", &err),
        },
        ClientCommand::RefreshDungeons => match service.refresh_dungeons().await {
            Ok(count) => ServerEvent::DungeonsRefreshed(count),
            Err(err) => anyhow_event("Dungeon refresh failed", &err),
        },
        ClientCommand::GetStatus => ServerEvent::Status(service.status()),
        ClientCommand::Ping => ServerEvent::Ack("pong".to_string()),
        ClientCommand::Quit => {
            // reply before the accept loop tears down
            send_event(&mut write_half, ServerEvent::Ack("shutdown requested".to_string())).await?;
            service.quit();
            return Ok(());
        }
    };

    send_event(&mut write_half, reply).await
}

async fn send_event(writer: &mut OwnedWriteHalf, event: ServerEvent) -> Result<()> {
    let encoded = serde_json::to_string(&event)?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
