use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which roster a keystone was seen through.  Inferred from the presence of a
/// guild affiliation on the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceChannel {
    #[default]
    Friends,
    Guild,
}

impl SourceChannel {
    pub fn label(self) -> &'static str {
        match self {
            SourceChannel::Friends => "friends",
            SourceChannel::Guild => "guild",
        }
    }
}

/// One character's keystone as extracted from the save file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub character_name: String,
    pub key_level: u32,
    pub dungeon_id: u32,
    pub dungeon_name: String,
    /// Seconds since the start of `week`, exactly as stored by the addon.
    pub raw_timestamp: u64,
    pub week: u64,
    pub resolved_timestamp: DateTime<Utc>,
    #[serde(rename = "source")]
    pub source_channel: SourceChannel,
}

/// The unit of local persistence.  Replaced wholesale on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "last_updated")]
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
}

impl Snapshot {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            generated_at: Utc::now(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
