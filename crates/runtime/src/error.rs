use std::io;
use std::path::PathBuf;

use keywatch_keys::StoreError;
use keywatch_sheets::SheetsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The watched save file could not be read.
    #[error("cannot read save file {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The local snapshot could not be written or read back.
    #[error("local snapshot: {0}")]
    Store(#[from] StoreError),
    #[error("remote sheet: {0}")]
    Remote(SheetsError),
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),
    #[error("no save file selected")]
    NoWatchPath,
    #[error("no keys data found; parse a save file first")]
    NoSnapshot,
    /// The watched file changed while this run was in flight.
    #[error("{} is no longer the watched save file", path.display())]
    Superseded { path: PathBuf },
}

impl From<SheetsError> for PipelineError {
    fn from(err: SheetsError) -> Self {
        match err {
            SheetsError::ConfigurationMissing(message) => PipelineError::ConfigurationMissing(message),
            other => PipelineError::Remote(other),
        }
    }
}

impl PipelineError {
    /// Short heading used for operator notifications.
    pub fn title(&self) -> &'static str {
        match self {
            PipelineError::FileAccess { .. } => "File access failed",
            PipelineError::Store(_) => "Saving keys failed",
            PipelineError::Remote(_) => "Sheet export failed",
            PipelineError::ConfigurationMissing(_) => "Configuration missing",
            PipelineError::NoWatchPath => "No save file selected",
            PipelineError::NoSnapshot => "No keys data",
            PipelineError::Superseded { .. } => "Parse discarded",
        }
    }
}
