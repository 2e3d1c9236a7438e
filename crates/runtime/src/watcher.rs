//! Watch/debounce controller for the selected save file.
//!
//! File-system notifications are pushed onto a bounded queue.  A single task
//! per watched path drains the queue: the first notification arms the
//! debounce window, every further one inside the window re-arms it, and once
//! the window passes quietly the run callback fires.  Notifications that
//! arrive while a run is in flight queue up and trigger one more run after it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Queue depth between the notify callback and the debounce task.  A full
/// queue means a run is already pending, so extra notifications are dropped.
pub const WORK_QUEUE_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchState {
    Idle,
    Watching,
    PendingParse,
    Parsing,
}

/// Pipeline entry point invoked once per coalesced burst of changes.
pub type RunFn = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync>;

struct ActiveWatch {
    path: PathBuf,
    // Dropping the watcher unregisters it.
    _watcher: RecommendedWatcher,
    task: AbortHandle,
}

pub struct WatchController {
    debounce: Duration,
    run: RunFn,
    state: Arc<watch::Sender<WatchState>>,
    active: Option<ActiveWatch>,
}

impl WatchController {
    pub fn new(debounce: Duration, run: RunFn) -> Self {
        let (state, _) = watch::channel(WatchState::Idle);
        Self {
            debounce,
            run,
            state: Arc::new(state),
            active: None,
        }
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|active| active.path.as_path())
    }

    /// Watch `path`, closing any previous watch first.  The file's parent
    /// directory is observed so editors that replace the file are still seen.
    pub fn start(&mut self, path: PathBuf) -> notify::Result<()> {
        self.stop();

        let (tx, rx) = mpsc::channel::<()>(WORK_QUEUE_CAP);
        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_relevant(&event, &target) => {
                    let _ = tx.try_send(());
                }
                Ok(_) => {}
                Err(err) => warn!(?err, "save file watcher error"),
            }
        })?;

        let dir = watch_dir(&path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let task = spawn_debounce_loop(
            rx,
            self.debounce,
            self.run.clone(),
            path.clone(),
            self.state.clone(),
        );
        self.state.send_replace(WatchState::Watching);
        info!(path = %path.display(), debounce_ms = self.debounce.as_millis() as u64, "watching save file");

        self.active = Some(ActiveWatch {
            path,
            _watcher: watcher,
            task: task.abort_handle(),
        });
        Ok(())
    }

    /// Close the watcher and cancel any pending or in-flight run.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
            info!(path = %active.path.display(), "stopped watching save file");
        }
        self.state.send_replace(WatchState::Idle);
    }
}

impl Drop for WatchController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_relevant(event: &Event, target: &Path) -> bool {
    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return false;
    }
    let Some(name) = target.file_name() else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(name))
}

/// Drain `rx`, coalescing bursts separated by less than `debounce` into one
/// call of `run`.  Exits when every sender is gone.
pub fn spawn_debounce_loop(
    mut rx: mpsc::Receiver<()>,
    debounce: Duration,
    run: RunFn,
    path: PathBuf,
    state: Arc<watch::Sender<WatchState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            state.send_replace(WatchState::PendingParse);
            let mut coalesced = 1usize;
            let mut closed = false;
            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(())) => coalesced += 1,
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            debug!(path = %path.display(), coalesced, "debounce window elapsed");
            state.send_replace(WatchState::Parsing);
            run(path.clone()).await;
            state.send_replace(WatchState::Watching);

            if closed {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_run(counter: Arc<AtomicUsize>) -> RunFn {
        Arc::new(move |_path: PathBuf| -> BoxFuture<'static, ()> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn relevance_filters_kind_and_name() {
        let target = Path::new("/wtf/SavedVariables/AstralKeys.lua");
        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/wtf/SavedVariables/AstralKeys.lua"),
            target
        ));
        assert!(is_relevant(
            &event(EventKind::Create(CreateKind::File), "/wtf/SavedVariables/AstralKeys.lua"),
            target
        ));
        assert!(!is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/wtf/SavedVariables/Other.lua"),
            target
        ));
        assert!(!is_relevant(
            &event(EventKind::Remove(RemoveKind::File), "/wtf/SavedVariables/AstralKeys.lua"),
            target
        ));
    }

    #[tokio::test]
    async fn burst_of_notifications_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(WORK_QUEUE_CAP);
        let (state, mut state_rx) = watch::channel(WatchState::Watching);
        let _task = spawn_debounce_loop(
            rx,
            Duration::from_millis(100),
            counting_run(runs.clone()),
            PathBuf::from("AstralKeys.lua"),
            Arc::new(state),
        );

        for _ in 0..8 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*state_rx.borrow_and_update(), WatchState::PendingParse);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*state_rx.borrow(), WatchState::Watching);
    }

    #[tokio::test]
    async fn separated_bursts_run_separately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(WORK_QUEUE_CAP);
        let (state, _) = watch::channel(WatchState::Watching);
        let _task = spawn_debounce_loop(
            rx,
            Duration::from_millis(50),
            counting_run(runs.clone()),
            PathBuf::from("AstralKeys.lua"),
            Arc::new(state),
        );

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_queue_flushes_pending_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(WORK_QUEUE_CAP);
        let (state, _) = watch::channel(WatchState::Watching);
        let task = spawn_debounce_loop(
            rx,
            Duration::from_secs(5),
            counting_run(runs.clone()),
            PathBuf::from("AstralKeys.lua"),
            Arc::new(state),
        );
        tx.send(()).await.unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_returns_to_idle() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("AstralKeys.lua");
        std::fs::write(&file, "").unwrap();

        let mut controller =
            WatchController::new(Duration::from_millis(50), counting_run(Arc::new(AtomicUsize::new(0))));
        assert_eq!(controller.state(), WatchState::Idle);
        controller.start(file.clone()).unwrap();
        assert_eq!(controller.state(), WatchState::Watching);
        assert_eq!(controller.path(), Some(file.as_path()));
        controller.stop();
        assert_eq!(controller.state(), WatchState::Idle);
        assert!(controller.path().is_none());
    }
}
