use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::schema::Snapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The single JSON document holding the latest [`Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored snapshot.
    ///
    /// The document is written to a `.tmp` sibling, synced, then renamed over
    /// the original, so readers see either the previous snapshot or the new
    /// one.  A `.tmp` left behind by an interrupted write (the task aborted
    /// between write and rename) is swept before the next write starts.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| StoreError::io(parent, err))?;
            }
        }

        let rendered = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "snapshot.json".to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => debug!(path = %tmp_path.display(), "removed leftover snapshot temp file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&tmp_path, err)),
        }

        let write_result: io::Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&rendered).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&tmp_path, err));
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&self.path, err));
        }

        Ok(())
    }

    /// Read the stored snapshot.  `Ok(None)` when nothing has been written yet.
    pub async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dungeons::DungeonCatalog;
    use crate::extract::{ExtractOptions, extract_entries};
    use tempfile::TempDir;

    fn sample_snapshot() -> Snapshot {
        let text = "{\n[\"unit\"] = \"A-Realm\",\n[\"key_level\"] = 10,\n[\"dungeon_id\"] = 504,\n[\"time_stamp\"] = 100,\n[\"guild\"] = \"G\",\n}\n{\n[\"unit\"] = \"B-Realm\",\n[\"key_level\"] = 2,\n[\"dungeon_id\"] = 1,\n[\"time_stamp\"] = 7,\n}\n";
        let out = extract_entries(text, &ExtractOptions::default(), &DungeonCatalog::builtin());
        Snapshot::new(out.entries)
    }

    #[tokio::test]
    async fn write_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("data/astral_keys_data.json"));
        let snapshot = sample_snapshot();
        store.write(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn write_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.json"));
        store.write(&sample_snapshot()).await.unwrap();
        store.write(&Snapshot::new(Vec::new())).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.is_empty());
        assert!(!dir.path().join("snap.json.tmp").exists());
    }

    #[tokio::test]
    async fn leftover_temp_file_from_an_interrupted_write_is_swept() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.json"));
        let tmp = dir.path().join("snap.json.tmp");
        std::fs::write(&tmp, "{\"half\": ").unwrap();

        store.write(&sample_snapshot()).await.unwrap();
        assert!(!tmp.exists());
        assert_eq!(store.load().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn document_uses_last_updated_and_source_keys() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.json"));
        store.write(&sample_snapshot()).await.unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json.get("last_updated").is_some());
        assert_eq!(json["entries"][0]["source"], "guild");
        assert_eq!(json["entries"][1]["source"], "friends");
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_corrupt_file_is_json_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = SnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[tokio::test]
    async fn unwritable_location_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = SnapshotStore::new(blocker.join("nested/snap.json"));
        let err = store.write(&sample_snapshot()).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
