use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Region ────────────────────────────────────────────────────────────────────

/// Game region whose weekly reset anchors the addon's relative timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Us,
    #[default]
    Eu,
    Tw,
}

// ── Watch config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Remembered save file.  Empty means no file has been selected yet.
    /// Overridden at runtime by `KEYWATCH_SAVE_FILE` when set.
    pub path: String,
    /// Quiet period after the last change notification before a parse runs.
    pub debounce_ms: u64,
    /// Hard cap on entries processed per pipeline run.  Excess entries are
    /// truncated with a warning.
    pub max_entries: usize,
    /// Week number assumed when a record carries no `week` field.
    pub default_week: u64,
    pub region: Region,
    /// Installation directories scanned by save-file discovery.  Each root is
    /// expected to contain `<account>/SavedVariables/AstralKeys.lua`.
    pub search_roots: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            debounce_ms: 500,
            max_entries: 10_000,
            default_week: 419,
            region: Region::Eu,
            search_roots: default_search_roots(),
        }
    }
}

fn default_search_roots() -> Vec<String> {
    let mut roots = Vec::new();
    for drive in ["C:", "D:", "E:"] {
        for program_files in ["Program Files (x86)", "Program Files"] {
            for flavour in ["_retail_", "_classic_"] {
                roots.push(format!(
                    "{drive}\\{program_files}\\World of Warcraft\\{flavour}\\WTF\\Account"
                ));
            }
        }
    }
    roots
}

impl WatchConfig {
    pub fn watch_path(&self) -> Option<PathBuf> {
        let trimmed = self.path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

// ── Sheets config ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// Destination spreadsheet.  Empty disables every remote operation with a
    /// configuration error.  Overridden by `KEYWATCH_SPREADSHEET_ID`.
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// JSON file holding an OAuth `access_token` for the sheets API.
    pub credentials_path: String,
    /// Bearer token taken from `KEYWATCH_SHEETS_TOKEN`.  Never written back
    /// to disk.
    #[serde(skip)]
    pub access_token: Option<String>,
    pub api_base_url: String,
    /// Upper bound on a whole reconciliation or cleanup run.
    pub timeout_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_name: "Sheet1".to_string(),
            credentials_path: "service-account.json".to_string(),
            access_token: None,
            api_base_url: "https://sheets.googleapis.com".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".keywatch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DungeonsConfig {
    /// Upstream `Dungeons.lua` used to refresh the id → name table.
    pub source_url: String,
}

impl Default for DungeonsConfig {
    fn default() -> Self {
        Self {
            source_url:
                "https://raw.githubusercontent.com/astralguild/AstralKeys/refs/heads/main/Dungeons.lua"
                    .to_string(),
        }
    }
}

/// Operator preferences toggled from the control surface.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreferencesConfig {
    pub autostart: bool,
    pub start_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Directory for the daily rolling log file.  Empty logs to stderr only.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/keywatch.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub watch: WatchConfig,
    pub sheets: SheetsConfig,
    pub storage: StorageConfig,
    pub audit: AuditConfig,
    pub dungeons: DungeonsConfig,
    pub preferences: PreferencesConfig,
    pub telemetry: TelemetryConfig,
    pub daemon: DaemonConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// The file's contents alone, without environment overrides.  Missing
    /// file → defaults.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(_) => Ok(Self::default()),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("KEYWATCH_SPREADSHEET_ID") {
            if !value.is_empty() {
                self.sheets.spreadsheet_id = value;
            }
        }

        if let Ok(token) = env::var("KEYWATCH_SHEETS_TOKEN") {
            if !token.is_empty() {
                self.sheets.access_token = Some(token);
            }
        }

        if let Ok(path) = env::var("KEYWATCH_SAVE_FILE") {
            if !path.is_empty() {
                self.watch.path = path;
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Location of the persisted snapshot document.
    pub fn snapshot_path(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join("astral_keys_data.json")
    }

    pub fn remote_configured(&self) -> bool {
        !self.sheets.spreadsheet_id.trim().is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
