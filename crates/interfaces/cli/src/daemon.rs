use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use keywatch_config::AppConfig;
use keywatch_runtime::{KeyService, run_daemon};

use crate::CONFIG_PATH;

/// Serve the control socket until a client sends `Quit` or the process is
/// interrupted.
pub(crate) async fn run_foreground(config: AppConfig) -> Result<()> {
    let socket_path = PathBuf::from(&config.daemon.socket_path);
    let service = Arc::new(KeyService::new(config, Some(PathBuf::from(CONFIG_PATH))));
    let daemon = run_daemon(service.clone(), socket_path);
    tokio::pin!(daemon);

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c().await?;
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = &mut daemon => {
            result?;
        }
        result = terminate => {
            result?;
            info!("termination signal received");
            service.quit();
            daemon.await?;
        }
    }

    Ok(())
}
