//! Background reconciliation of filesystem changes with the repository.
//!
//! The [`ChangeReconciler`] consumes one channel carrying both filesystem
//! notifications and suspend/resume control messages, so their relative order
//! is exactly the order they were sent in. Notifications only mark paths; the
//! actual rescan runs on the blocking pool once the currently queued messages
//! have been drained, so a burst of events costs a single rescan.

pub mod watcher;

pub use watcher::{FsWatcher, map_notify_event};

use crate::repository::ModRepository;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Kind of change reported for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One filesystem notification for a path inside a mod directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNotification {
    pub path: Utf8PathBuf,
    pub kind: FsChangeKind,
}

impl FsNotification {
    pub fn created(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsChangeKind::Created,
        }
    }

    pub fn modified(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsChangeKind::Modified,
        }
    }

    pub fn deleted(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsChangeKind::Deleted,
        }
    }
}

/// Messages accepted by the reconciler task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerMessage {
    Notification(FsNotification),
    /// Ignore notifications until the next `Resume`
    Suspend,
    /// Stop ignoring notifications and rescan once
    Resume,
    Shutdown,
}

/// Sending side of the reconciler channel.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<ReconcilerMessage>,
}

impl ReconcilerHandle {
    /// Queue a notification.
    ///
    /// # Returns
    /// `false` if the reconciler has stopped
    pub fn notify(&self, notification: FsNotification) -> bool {
        self.send(ReconcilerMessage::Notification(notification))
    }

    pub fn suspend(&self) -> bool {
        self.send(ReconcilerMessage::Suspend)
    }

    pub fn resume(&self) -> bool {
        self.send(ReconcilerMessage::Resume)
    }

    pub fn shutdown(&self) -> bool {
        self.send(ReconcilerMessage::Shutdown)
    }

    /// Run `f` with notifications suppressed; resumes even if `f` panics.
    pub fn suppressed<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        struct ResumeOnDrop<'a>(&'a ReconcilerHandle);

        impl Drop for ResumeOnDrop<'_> {
            fn drop(&mut self) {
                self.0.resume();
            }
        }

        self.suspend();
        let _resume = ResumeOnDrop(self);
        f()
    }

    fn send(&self, message: ReconcilerMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Reconciler stopped, dropping {:?}", e.0);
                false
            }
        }
    }
}

pub struct ChangeReconciler {
    repo: Arc<ModRepository>,
    rx: mpsc::UnboundedReceiver<ReconcilerMessage>,
    retry_delay: Duration,
    suspended: bool,
    rescan_needed: bool,
}

impl ChangeReconciler {
    /// Start the reconciler on the current tokio runtime.
    ///
    /// # Arguments
    /// * `repo` - Repository whose snapshot is kept current
    /// * `retry_delay` - Wait before retrying a rescan rejected as busy
    ///
    /// # Returns
    /// The handle for sending messages and the task's join handle
    pub fn spawn(
        repo: Arc<ModRepository>,
        retry_delay: Duration,
    ) -> (ReconcilerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reconciler = Self {
            repo,
            rx,
            retry_delay,
            suspended: false,
            rescan_needed: false,
        };
        let task = tokio::spawn(reconciler.run());
        (ReconcilerHandle { tx }, task)
    }

    async fn run(mut self) {
        tracing::info!("Change reconciler started");

        while let Some(message) = self.rx.recv().await {
            let mut running = self.handle(message);
            while running {
                match self.rx.try_recv() {
                    Ok(message) => running = self.handle(message),
                    Err(_) => break,
                }
            }

            if self.rescan_needed && !self.suspended {
                running &= self.rescan().await;
            }

            if !running {
                break;
            }
        }

        if self.suspended {
            self.repo.state().set_reconciler_suspended(false);
        }
        tracing::info!("Change reconciler stopped");
    }

    /// Apply one message. Returns `false` on shutdown.
    fn handle(&mut self, message: ReconcilerMessage) -> bool {
        let metrics = self.repo.state().metrics();

        match message {
            ReconcilerMessage::Notification(notification) => {
                if self.suspended {
                    metrics.record_suppressed_notification();
                    tracing::debug!("Suppressed notification for {}", notification.path);
                    return true;
                }
                if !self.is_relevant(&notification.path) {
                    return true;
                }

                metrics.record_notification();
                tracing::debug!("{:?} {}", notification.kind, notification.path);
                match notification.kind {
                    FsChangeKind::Created | FsChangeKind::Modified => {
                        self.repo.mark_dirty(&notification.path)
                    }
                    FsChangeKind::Deleted => self.repo.mark_removed(&notification.path),
                }
                self.rescan_needed = true;
            }
            ReconcilerMessage::Suspend => {
                if !self.suspended {
                    self.suspended = true;
                    self.repo.state().set_reconciler_suspended(true);
                    tracing::debug!("Reconciler suspended");
                }
            }
            ReconcilerMessage::Resume => {
                if self.suspended {
                    self.suspended = false;
                    self.rescan_needed = true;
                    self.repo.state().set_reconciler_suspended(false);
                    tracing::debug!("Reconciler resumed");
                }
            }
            ReconcilerMessage::Shutdown => return false,
        }

        true
    }

    /// Only top-level `.zip` files of the two mod directories matter.
    fn is_relevant(&self, path: &Utf8Path) -> bool {
        path.extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("zip"))
            && self.repo.layout().bucket_of(path).is_some()
    }

    /// Rescan until it is accepted, retrying while another operation holds the gate.
    ///
    /// Returns `false` if a shutdown arrived while waiting.
    async fn rescan(&mut self) -> bool {
        loop {
            let repo = Arc::clone(&self.repo);
            match tokio::task::spawn_blocking(move || repo.rescan()).await {
                Ok(Ok(_)) => {
                    self.rescan_needed = false;
                    return true;
                }
                Ok(Err(e)) if e.is_busy() => {
                    self.repo.state().metrics().record_busy_retry();
                    tracing::debug!("{}, retrying in {:?}", e, self.retry_delay);
                    tokio::time::sleep(self.retry_delay).await;

                    while let Ok(message) = self.rx.try_recv() {
                        if !self.handle(message) {
                            return false;
                        }
                    }
                    if self.suspended {
                        return true;
                    }
                }
                Ok(Err(e)) => {
                    // Pending marks stay with the repository for the next attempt.
                    tracing::warn!("Rescan failed: {}", e);
                    self.rescan_needed = false;
                    return true;
                }
                Err(e) => {
                    tracing::error!("Rescan task failed: {}", e);
                    self.rescan_needed = false;
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameLayout;
    use crate::services::archive::ArchiveInspector;
    use crate::services::safety::{NoSoundBanks, SafetyClassifier, SafetyRules};
    use crate::state::{OperationKind, StateChange, StateManager};
    use std::fs;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn repository() -> (Arc<ModRepository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let layout = GameLayout::new(&root);
        fs::create_dir_all(layout.mods_dir()).unwrap();
        fs::create_dir_all(layout.disabled_mods_dir()).unwrap();

        let classifier = SafetyClassifier::new(SafetyRules::default(), Arc::new(NoSoundBanks));
        let repo = ModRepository::new(layout, ArchiveInspector::new(classifier), StateManager::new());
        (Arc::new(repo), temp_dir)
    }

    #[tokio::test]
    async fn test_irrelevant_notifications_do_not_rescan() {
        let (repo, temp_dir) = repository();
        let (handle, task) = ChangeReconciler::spawn(Arc::clone(&repo), Duration::from_millis(10));

        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        handle.notify(FsNotification::created(root.join("Mods").join("readme.txt")));
        handle.notify(FsNotification::created(root.join("elsewhere.zip")));
        handle.notify(FsNotification::created(
            root.join("Mods").join("nested").join("a.zip"),
        ));
        handle.shutdown();
        task.await.unwrap();

        let metrics = repo.state().metrics();
        assert_eq!(metrics.scans_completed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.notifications_processed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_suppressed_wraps_suspend_and_resume() {
        let (repo, _temp_dir) = repository();
        let mut rx = repo.state().subscribe();
        let (handle, task) = ChangeReconciler::spawn(Arc::clone(&repo), Duration::from_millis(10));

        let value = handle.suppressed(|| 42);
        assert_eq!(value, 42);

        let mut seen = Vec::new();
        while !seen
            .iter()
            .any(|c| matches!(c, StateChange::RepositoryRescanned { .. }))
        {
            let change = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for rescan")
                .unwrap();
            seen.push(change);
        }

        assert!(seen.contains(&StateChange::ReconcilerSuspended));
        assert!(seen.contains(&StateChange::ReconcilerResumed));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_rescan_is_retried() {
        let (repo, temp_dir) = repository();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let archive = root.join("Mods").join("a.zip");
        fs::write(&archive, b"").unwrap();

        let guard = repo
            .state()
            .try_begin_operation(OperationKind::Delete)
            .unwrap();
        let mut rx = repo.state().subscribe();
        let (handle, task) = ChangeReconciler::spawn(Arc::clone(&repo), Duration::from_millis(20));

        handle.notify(FsNotification::created(archive.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);

        loop {
            let change = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for rescan")
                .unwrap();
            if matches!(change, StateChange::RepositoryRescanned { .. }) {
                break;
            }
        }

        assert!(repo.state().metrics().busy_retries.load(Ordering::Relaxed) >= 1);
        assert_eq!(repo.entries().len(), 1);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_reconciler() {
        let (repo, _temp_dir) = repository();
        let (handle, task) = ChangeReconciler::spawn(repo, Duration::from_millis(10));

        assert!(handle.shutdown());
        task.await.unwrap();
        assert!(!handle.resume());
    }
}
