mod daemon;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use keywatch_config::AppConfig;
use keywatch_keys::{DungeonCatalog, SnapshotStore};
use keywatch_runtime::pipeline::{PipelineSettings, parse_text, persist, read_save_file};
use keywatch_runtime::{DaemonClient, Notification};

pub(crate) const CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "keywatch",
    version,
    about = "Watch an AstralKeys save file and mirror keystones to a spreadsheet"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the daemon in the foreground.
    Start,
    /// Parse a save file once without a daemon.
    Parse {
        path: PathBuf,
        /// Also write the snapshot document.
        #[arg(long)]
        persist: bool,
    },
    /// Select the save file to watch.  Omit the path to auto-discover it.
    Watch { path: Option<String> },
    /// List save files found under the configured search roots.
    Scan,
    /// Parse the watched file and print the result without storing it.
    Check,
    /// Parse, store, and export the watched file now.
    Refresh,
    /// Print the stored snapshot.
    Snapshot,
    /// Show or manage the daemon's audit log.
    Logs {
        #[command(subcommand)]
        command: Option<LogCommands>,
    },
    /// Reconcile the stored snapshot with the remote sheet.
    Export,
    /// Remove remote rows older than last week.
    Cleanup,
    /// Refresh dungeon names from the upstream addon table.
    Dungeons,
    Autostart {
        #[arg(value_enum)]
        value: Option<Toggle>,
    },
    StartHidden {
        #[arg(value_enum)]
        value: Option<Toggle>,
    },
    Status,
    /// Follow daemon notifications until interrupted.
    Follow,
    /// Ask the daemon to exit.
    Stop,
}

#[derive(Debug, Subcommand)]
enum LogCommands {
    Show,
    Clear,
    Settings,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));

    let (file_layer, guard) = if config.telemetry.log_dir.trim().is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, "keywatch.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load_from(CONFIG_PATH)?;
    let _log_guard = init_tracing(&config);

    let cli = Cli::parse();
    let client = DaemonClient::new(&config.daemon.socket_path);

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => daemon::run_foreground(config).await?,
        Commands::Parse {
            path,
            persist: write_snapshot,
        } => {
            let settings = PipelineSettings::from_config(&config);
            let text = read_save_file(&path).await?;
            let parsed = parse_text(&text, &settings, &DungeonCatalog::builtin());
            if write_snapshot {
                let store = SnapshotStore::new(config.snapshot_path());
                let snapshot = persist(&store, parsed.entries.clone()).await?;
                println!(
                    "stored {} keys in {}",
                    snapshot.len(),
                    store.path().display()
                );
            }
            output::print_parse(&parsed);
        }
        Commands::Watch { path } => {
            let (path, outcome) = client.select_watch_path(path).await?;
            println!("watching {path}");
            output::print_outcome(&outcome);
        }
        Commands::Scan => output::print_files(&client.scan_for_files().await?),
        Commands::Check => output::print_parse(&client.manual_parse().await?),
        Commands::Refresh => output::print_outcome(&client.refresh().await?),
        Commands::Snapshot => match client.snapshot().await? {
            Some(snapshot) => output::print_json(&snapshot)?,
            None => println!("no keys stored yet"),
        },
        Commands::Logs { command } => match command.unwrap_or(LogCommands::Show) {
            LogCommands::Show => output::print_logs(&client.logs().await?),
            LogCommands::Clear => {
                client.clear_logs().await?;
                println!("logs cleared");
            }
            LogCommands::Settings => {
                let settings = client.log_settings().await?;
                println!(
                    "{} of {} log entries in use",
                    settings.current_log_count, settings.max_logs
                );
            }
        },
        Commands::Export => {
            let report = client.export_to_remote().await?;
            println!(
                "export complete: {} updated, {} appended, {} unchanged",
                report.updated, report.appended, report.skipped
            );
        }
        Commands::Cleanup => {
            let report = client.cleanup_remote().await?;
            println!(
                "cleanup complete: {} removed, {} kept",
                report.removed, report.kept
            );
        }
        Commands::Dungeons => {
            let count = client.refresh_dungeons().await?;
            println!("dungeon table refreshed ({count} names)");
        }
        Commands::Autostart { value } => {
            let enabled = match value {
                Some(toggle) => client.set_autostart(toggle.enabled()).await?,
                None => client.autostart().await?,
            };
            println!("autostart: {}", if enabled { "on" } else { "off" });
        }
        Commands::StartHidden { value } => {
            let enabled = match value {
                Some(toggle) => client.set_start_hidden(toggle.enabled()).await?,
                None => client.start_hidden().await?,
            };
            println!("start hidden: {}", if enabled { "on" } else { "off" });
        }
        Commands::Status => output::print_status(&client.status().await?),
        Commands::Follow => {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification>();
            let follower = tokio::spawn(async move { client.subscribe(tx).await });
            while let Some(notification) = rx.recv().await {
                output::print_notification(&notification);
            }
            follower.await??;
        }
        Commands::Stop => {
            client.quit().await?;
            println!("daemon stop requested");
        }
    }

    Ok(())
}
