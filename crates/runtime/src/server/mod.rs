//! Unix-socket daemon serving the control surface.

mod connection;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tracing::{error, info, warn};

use crate::KeyService;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors the listener recovers from: descriptor exhaustion and connections
/// torn down before they were accepted.
fn is_transient_accept_error(err: &io::Error) -> bool {
    const EMFILE: i32 = 24;
    const ENFILE: i32 = 23;
    const ENOMEM: i32 = 12;
    if matches!(err.raw_os_error(), Some(EMFILE | ENFILE | ENOMEM)) {
        return true;
    }
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Serve `service` on `socket_path` until a client sends `Quit`.
///
/// A stale socket file from a previous run is removed first.  The remembered
/// save file, if any, is re-armed before the first connection is accepted.
pub async fn run_daemon(service: Arc<KeyService>, socket_path: impl AsRef<Path>) -> Result<()> {
    let socket_path = socket_path.as_ref().to_path_buf();
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding daemon socket {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "keywatch daemon listening");

    let mut shutdown_rx = service.shutdown_signal();
    if let Some(outcome) = service.resume().await {
        info!(entries = outcome.snapshot.len(), "resumed watch on remembered save file");
    }

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                let stream = match accept {
                    Ok((stream, _)) => stream,
                    Err(err) if is_transient_accept_error(&err) => {
                        warn!(?err, "accept failed; retrying");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                    Err(err) => {
                        error!(?err, "daemon listener failed");
                        let _ = std::fs::remove_file(&socket_path);
                        return Err(err).context("accepting daemon connection");
                    }
                };
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(err) = connection::handle_connection(stream, service).await {
                        error!(?err, "daemon connection handler failed");
                    }
                });
            }
        }
    }

    info!("daemon shutting down gracefully");
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_exhaustion_does_not_stop_the_listener() {
        assert!(is_transient_accept_error(&io::Error::from_raw_os_error(24)));
        assert!(is_transient_accept_error(&io::Error::from_raw_os_error(23)));
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
    }

    #[test]
    fn broken_listener_is_fatal() {
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::InvalidInput
        )));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
