mod client;
mod commands;
pub mod discover;
pub mod error;
mod events;
pub mod pipeline;
mod server;
pub mod service;
pub mod single_flight;
pub mod watcher;

pub use client::DaemonClient;
pub use commands::{ClientCommand, ServerEvent, ServiceStatus};
pub use discover::{DiscoveredFile, Flavour, scan_for_save_files};
pub use error::PipelineError;
pub use events::Notification;
pub use pipeline::{ParseOutput, PipelineOutcome, PipelineSettings, RemoteOutcome};
pub use server::run_daemon;
pub use service::KeyService;
pub use single_flight::SingleFlight;
pub use watcher::{RunFn, WatchController, WatchState};
