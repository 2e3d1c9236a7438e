use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Per-path gate: at most one pipeline run in flight for a given save file.
/// Later callers for the same path wait for the current run to finish.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    slots: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(key.to_path_buf()).or_default().clone()
    }

    /// Wait for the gate on `key`; the run holds it until the guard drops.
    pub async fn acquire(&self, key: &Path) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    pub fn is_busy(&self, key: &Path) -> bool {
        self.slot(key).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_runs_are_serialized() {
        let gate = SingleFlight::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire(Path::new("/saves/AstralKeys.lua")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_paths_do_not_block() {
        let gate = SingleFlight::new();
        let _a = gate.acquire(Path::new("/a.lua")).await;
        assert!(gate.is_busy(Path::new("/a.lua")));
        assert!(!gate.is_busy(Path::new("/b.lua")));
        let _b = gate.acquire(Path::new("/b.lua")).await;
    }
}
