pub mod dedupe;
pub mod dungeons;
pub mod extract;
pub mod schema;
pub mod store;
pub mod timestamp;

pub use dedupe::dedupe;
pub use dungeons::{DungeonCatalog, parse_dungeon_table, placeholder_name};
pub use extract::{ExtractOptions, Extraction, RawBlock, extract_entries, scan_blocks};
pub use schema::{Entry, Snapshot, SourceChannel};
pub use store::{SnapshotStore, StoreError};
