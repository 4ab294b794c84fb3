//! The two-bucket mod repository.
//!
//! Mods live as `.zip` archives directly inside `Mods` (active) or
//! `DisabledMods` (inactive). Moving a file between the two is the only way
//! activation changes. Every scan enumerates both directories, reuses cached
//! classifications for unchanged archives and publishes a fresh snapshot
//! through the [`StateManager`].

pub mod cache;

pub use cache::{ArchiveFingerprint, CachedClassification, ClassificationCache};

use crate::config::{SettingsError, SettingsStore};
use crate::error::{ModError, ModResult};
use crate::models::{ActivationState, BatchReport, GameLayout, ModBucket, ModEntry, SafetyVerdict};
use crate::services::archive::ArchiveInspector;
use crate::services::safety::SafetyClassifier;
use crate::state::{OperationGuard, OperationKind, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// What to do when the destination already holds a file with the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Leave both files alone and fail the item with [`ModError::MoveCollision`]
    #[default]
    Skip,
    /// Replace the existing file (caller confirmed)
    Overwrite,
}

/// Change recorded for a path since the last scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChange {
    Dirty,
    Removed,
}

/// Lifecycle of a tracked archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unseen,
    Scanned(SafetyVerdict),
    Dirty,
    Removed,
}

/// Counters describing one published scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    pub classified: usize,
    pub reused: usize,
    pub dropped: usize,
}

pub struct ModRepository {
    layout: GameLayout,
    inspector: ArchiveInspector,
    state: StateManager,
    cache: Mutex<ClassificationCache>,
    pending: Mutex<HashMap<Utf8PathBuf, PendingChange>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModRepository {
    pub fn new(layout: GameLayout, inspector: ArchiveInspector, state: StateManager) -> Self {
        Self {
            layout,
            inspector,
            state,
            cache: Mutex::new(ClassificationCache::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Repository for a game installation, classifying against its installed sound banks.
    pub fn for_game(layout: GameLayout, state: StateManager) -> Self {
        let classifier = SafetyClassifier::for_game(layout.soundbanks_dir());
        Self::new(layout, ArchiveInspector::new(classifier), state)
    }

    pub fn layout(&self) -> &GameLayout {
        &self.layout
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn entries(&self) -> std::sync::Arc<Vec<ModEntry>> {
        self.state.entries()
    }

    // Directory preconditions

    /// Bucket directories that do not exist.
    pub fn missing_directories(&self) -> Vec<(ModBucket, Utf8PathBuf)> {
        ModBucket::ALL
            .into_iter()
            .map(|bucket| (bucket, self.layout.bucket_dir(bucket)))
            .filter(|(_, dir)| !dir.is_dir())
            .collect()
    }

    /// Fail with [`ModError::DirectoryMissing`] if either bucket directory is absent.
    pub fn check_directories(&self) -> ModResult<()> {
        match self.missing_directories().into_iter().next() {
            Some((bucket, path)) => Err(ModError::DirectoryMissing {
                name: bucket.dir_name(),
                path,
            }),
            None => Ok(()),
        }
    }

    /// Create whichever bucket directories are missing.
    ///
    /// # Returns
    /// The directories that were created
    pub fn create_missing_directories(&self) -> ModResult<Vec<Utf8PathBuf>> {
        let mut created = Vec::new();
        for (bucket, dir) in self.missing_directories() {
            fs::create_dir_all(&dir)?;
            tracing::info!("Created {} directory at {}", bucket.dir_name(), dir);
            created.push(dir);
        }
        Ok(created)
    }

    // Change tracking

    /// Record a create/modify notification: the archive is reclassified on the next scan.
    pub fn mark_dirty(&self, path: &Utf8Path) {
        lock(&self.pending).insert(path.to_path_buf(), PendingChange::Dirty);
    }

    /// Record a delete notification: the entry and its cached verdict go away on the next scan.
    ///
    /// A file re-created at the same path before that scan is classified afresh.
    pub fn mark_removed(&self, path: &Utf8Path) {
        lock(&self.pending).insert(path.to_path_buf(), PendingChange::Removed);
    }

    pub fn file_state(&self, path: &Utf8Path) -> FileState {
        match lock(&self.pending).get(path) {
            Some(PendingChange::Dirty) => return FileState::Dirty,
            Some(PendingChange::Removed) => return FileState::Removed,
            None => {}
        }
        match lock(&self.cache).get(path) {
            Some(cached) => FileState::Scanned(cached.verdict),
            None => FileState::Unseen,
        }
    }

    /// Forget every cached classification; the next scan reclassifies everything.
    pub fn invalidate_cache(&self) {
        let mut cache = lock(&self.cache);
        if cache.is_empty() {
            return;
        }
        let dropped = cache.len();
        cache.clear();
        tracing::info!("Classification cache invalidated ({} entries)", dropped);
    }

    pub fn cached_count(&self) -> usize {
        lock(&self.cache).len()
    }

    // Scanning

    /// Enumerate both directories and publish a new snapshot.
    ///
    /// Only new, changed or dirty archives are classified.
    pub fn rescan(&self) -> ModResult<ScanSummary> {
        let _guard = self.state.try_begin_operation(OperationKind::Scan)?;
        self.rebuild()
    }

    /// Rebuild the snapshot. The caller holds the operation gate.
    fn rebuild(&self) -> ModResult<ScanSummary> {
        let pending = std::mem::take(&mut *lock(&self.pending));

        match self.build_entries(&pending) {
            Ok((entries, summary)) => {
                self.state.publish_scan(entries);
                self.state.metrics().record_scan();
                tracing::info!(
                    "Scan complete: {} mods, {} classified, {} cached, {} dropped",
                    summary.total,
                    summary.classified,
                    summary.reused,
                    summary.dropped
                );
                Ok(summary)
            }
            Err(e) => {
                // Keep the marks for the next attempt, newer marks win.
                let mut current = lock(&self.pending);
                for (path, change) in pending {
                    current.entry(path).or_insert(change);
                }
                Err(e)
            }
        }
    }

    fn build_entries(
        &self,
        pending: &HashMap<Utf8PathBuf, PendingChange>,
    ) -> ModResult<(Vec<ModEntry>, ScanSummary)> {
        self.check_directories()?;

        let metrics = self.state.metrics();
        let mut cache = lock(&self.cache);
        let mut summary = ScanSummary::default();
        let mut present = HashSet::new();
        let mut entries = Vec::new();

        for (path, change) in pending {
            if *change == PendingChange::Removed && cache.remove(path).is_some() {
                summary.dropped += 1;
            }
        }

        for bucket in ModBucket::ALL {
            let dir = self.layout.bucket_dir(bucket);
            for path in list_archives(&dir)? {
                let fingerprint = match ArchiveFingerprint::read(&path) {
                    Ok(fingerprint) => fingerprint,
                    Err(e) => {
                        tracing::debug!("{} vanished during scan: {}", path, e);
                        continue;
                    }
                };

                let reusable = if pending.contains_key(&path) {
                    None
                } else {
                    cache.lookup(&path, &fingerprint).cloned()
                };

                let record = match reusable {
                    Some(record) => {
                        metrics.record_cache_hit();
                        summary.reused += 1;
                        record
                    }
                    None => {
                        let record = self.classify(&path, fingerprint);
                        cache.insert(path.clone(), record.clone());
                        summary.classified += 1;
                        record
                    }
                };

                present.insert(path.clone());
                entries.push(ModEntry::new(
                    path,
                    bucket,
                    record.verdict,
                    record.valid,
                    record.metadata,
                ));
            }
        }

        summary.dropped += cache.retain_present(&present);
        summary.total = entries.len();
        entries.sort_by(|a, b| {
            (a.bucket() != ModBucket::Enabled, a.display_name.to_lowercase())
                .cmp(&(b.bucket() != ModBucket::Enabled, b.display_name.to_lowercase()))
        });

        Ok((entries, summary))
    }

    fn classify(&self, path: &Utf8Path, fingerprint: ArchiveFingerprint) -> CachedClassification {
        let metrics = self.state.metrics();
        let started = Instant::now();

        match self.inspector.inspect(path) {
            Ok(report) => {
                metrics.record_classification(started.elapsed());
                tracing::debug!(
                    "Classified {} as {}",
                    path,
                    SafetyVerdict::from(report.online_safe)
                );
                CachedClassification {
                    fingerprint,
                    verdict: report.online_safe.into(),
                    valid: true,
                    metadata: report.metadata,
                }
            }
            Err(e) => {
                metrics.record_unreadable_archive();
                tracing::warn!("{}", e);
                CachedClassification {
                    fingerprint,
                    verdict: SafetyVerdict::Unsafe,
                    valid: false,
                    metadata: None,
                }
            }
        }
    }

    // Activation

    /// Destination paths that already exist for moving `items` into `target`.
    pub fn collisions(&self, items: &[Utf8PathBuf], target: ActivationState) -> Vec<Utf8PathBuf> {
        let dir = self.layout.bucket_dir(target.bucket());
        items
            .iter()
            .filter(|item| self.layout.bucket_of(item) != Some(target.bucket()))
            .filter_map(|item| item.file_name().map(|name| dir.join(name)))
            .filter(|destination| destination.exists())
            .collect()
    }

    pub fn activate(&self, items: &[Utf8PathBuf], policy: CollisionPolicy) -> ModResult<BatchReport> {
        self.set_activation(items, ActivationState::Active, policy)
    }

    pub fn deactivate(
        &self,
        items: &[Utf8PathBuf],
        policy: CollisionPolicy,
    ) -> ModResult<BatchReport> {
        self.set_activation(items, ActivationState::Inactive, policy)
    }

    /// Move every item into the directory for `target`.
    ///
    /// Items fail independently; the batch always runs to the end.
    pub fn set_activation(
        &self,
        items: &[Utf8PathBuf],
        target: ActivationState,
        policy: CollisionPolicy,
    ) -> ModResult<BatchReport> {
        let guard = self.state.try_begin_operation(OperationKind::Activation)?;
        self.check_directories()?;
        self.move_items(guard, items, target, policy)
    }

    /// Move `items` under an already claimed activation gate.
    fn move_items(
        &self,
        guard: OperationGuard,
        items: &[Utf8PathBuf],
        target: ActivationState,
        policy: CollisionPolicy,
    ) -> ModResult<BatchReport> {
        let destination_dir = self.layout.bucket_dir(target.bucket());
        let mut report = BatchReport::new();

        for item in items {
            let outcome = match self.layout.bucket_of(item) {
                None => Err(ModError::NotManaged(item.clone())),
                Some(bucket) if bucket == target.bucket() => {
                    if item.is_file() {
                        Ok(item.clone())
                    } else {
                        Err(ModError::Vanished(item.clone()))
                    }
                }
                Some(_) => match item.file_name() {
                    Some(name) => {
                        let destination = destination_dir.join(name);
                        move_archive(item, &destination, policy).map(|()| destination)
                    }
                    None => Err(ModError::NotManaged(item.clone())),
                },
            };
            self.record(&mut report, item, outcome);
        }

        self.finish_batch(guard, "Activation change", report)
    }

    /// Enable every selected mod if any of them is disabled, otherwise disable them all.
    pub fn toggle(&self, items: &[Utf8PathBuf], policy: CollisionPolicy) -> ModResult<BatchReport> {
        let any_inactive = items
            .iter()
            .any(|item| self.layout.bucket_of(item) == Some(ModBucket::Disabled));
        let target = if any_inactive {
            ActivationState::Active
        } else {
            ActivationState::Inactive
        };
        self.set_activation(items, target, policy)
    }

    /// Move every archive of the opposite bucket into `target`.
    ///
    /// The listing happens under the same gate as the moves.
    pub fn set_all(&self, target: ActivationState, policy: CollisionPolicy) -> ModResult<BatchReport> {
        let guard = self.state.try_begin_operation(OperationKind::Activation)?;
        self.check_directories()?;
        let source_dir = self.layout.bucket_dir(target.bucket().opposite());
        let items = list_archives(&source_dir)?;
        self.move_items(guard, &items, target, policy)
    }

    // Install and delete

    /// Move external `.zip` files into the enabled directory.
    pub fn install(&self, sources: &[Utf8PathBuf], policy: CollisionPolicy) -> ModResult<BatchReport> {
        let guard = self.state.try_begin_operation(OperationKind::Install)?;
        self.check_directories()?;

        let mods_dir = self.layout.mods_dir();
        let mut report = BatchReport::new();

        for source in sources {
            let outcome = if !is_zip(source) {
                Err(ModError::UnsupportedFormat(source.clone()))
            } else {
                match source.file_name() {
                    Some(name) => {
                        let destination = mods_dir.join(name);
                        move_archive(source, &destination, policy).map(|()| destination)
                    }
                    None => Err(ModError::UnsupportedFormat(source.clone())),
                }
            };
            self.record(&mut report, source, outcome);
        }

        self.finish_batch(guard, "Install", report)
    }

    /// Delete archives from either bucket.
    ///
    /// Targets that disappeared since selection are reported as [`ModError::Vanished`].
    pub fn delete(&self, items: &[Utf8PathBuf]) -> ModResult<BatchReport> {
        let guard = self.state.try_begin_operation(OperationKind::Delete)?;
        self.check_directories()?;

        let mut report = BatchReport::new();
        for item in items {
            let outcome = if self.layout.bucket_of(item).is_none() {
                Err(ModError::NotManaged(item.clone()))
            } else if !item.is_file() {
                Err(ModError::Vanished(item.clone()))
            } else {
                fs::remove_file(item)
                    .map(|()| item.clone())
                    .map_err(|source| match source.kind() {
                        io::ErrorKind::NotFound => ModError::Vanished(item.clone()),
                        _ => ModError::DeleteFailed {
                            path: item.clone(),
                            source,
                        },
                    })
            };
            self.record(&mut report, item, outcome);
        }

        self.finish_batch(guard, "Delete", report)
    }

    fn record(&self, report: &mut BatchReport, item: &Utf8Path, outcome: ModResult<Utf8PathBuf>) {
        let metrics = self.state.metrics();
        match outcome {
            Ok(path) => {
                metrics.record_file_operation();
                report.record_success(path);
            }
            Err(e) => {
                metrics.record_file_operation_failure();
                report.record_failure(item.to_path_buf(), e);
            }
        }
    }

    /// Publish the post-operation snapshot while still holding the gate.
    fn finish_batch(
        &self,
        guard: OperationGuard,
        label: &str,
        report: BatchReport,
    ) -> ModResult<BatchReport> {
        if let Err(e) = self.rebuild() {
            tracing::warn!("Rescan after {} failed: {}", guard.kind(), e);
        }
        drop(guard);
        tracing::info!("{} finished: {}", label, report.summary());
        Ok(report)
    }

    // Online-safe setting

    /// Load the online-safe setting from `store` into the published state.
    ///
    /// # Returns
    /// The effective setting; `false` when no settings exist
    pub fn sync_online_safe(&self, store: &dyn SettingsStore) -> Result<bool, SettingsError> {
        let enabled = store
            .load()?
            .is_some_and(|settings| settings.online_safe);
        self.state.set_online_safe_only(enabled);
        Ok(enabled)
    }

    /// Persist a new online-safe setting and publish it.
    pub fn set_online_safe(
        &self,
        store: &dyn SettingsStore,
        enabled: bool,
        settings_path: &Utf8Path,
    ) -> Result<(), SettingsError> {
        let Some(mut settings) = store.load()? else {
            return Err(SettingsError::Unavailable(settings_path.to_path_buf()));
        };
        settings.online_safe = enabled;
        store.save(&settings)?;
        self.state.set_online_safe_only(enabled);
        Ok(())
    }
}

/// Top-level `.zip` files of `dir`, sorted by path.
pub fn list_archives(dir: &Utf8Path) -> ModResult<Vec<Utf8PathBuf>> {
    let read_dir = fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ModError::DirectoryMissing {
            name: if dir.ends_with(ModBucket::Disabled.dir_name()) {
                ModBucket::Disabled.dir_name()
            } else {
                ModBucket::Enabled.dir_name()
            },
            path: dir.to_path_buf(),
        },
        _ => ModError::Io(e),
    })?;

    let mut archives = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let Ok(path) = Utf8PathBuf::try_from(entry.path()) else {
            tracing::warn!("Skipping non UTF-8 path {:?}", entry.path());
            continue;
        };
        if path.is_file() && is_zip(&path) {
            archives.push(path);
        }
    }

    archives.sort();
    Ok(archives)
}

fn is_zip(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("zip"))
}

/// Move one archive, refusing to clobber an existing file unless `policy` allows it.
///
/// Under [`CollisionPolicy::Skip`] the destination is claimed with a hard link,
/// which fails atomically if the name is already taken.
fn move_archive(from: &Utf8Path, to: &Utf8Path, policy: CollisionPolicy) -> ModResult<()> {
    if !from.is_file() {
        return Err(ModError::Vanished(from.to_path_buf()));
    }

    let linked = match policy {
        CollisionPolicy::Skip => fs::hard_link(from, to),
        CollisionPolicy::Overwrite => fs::rename(from, to),
    };

    match linked {
        Ok(()) if policy == CollisionPolicy::Skip => remove_source(from, to),
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(collision(to)),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !from.exists() => {
            Err(ModError::Vanished(from.to_path_buf()))
        }
        Err(e) if policy == CollisionPolicy::Skip || e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!("Falling back to copying {} to {}: {}", from, to, e);
            copy_across_devices(from, to, policy)
        }
        Err(source) => Err(move_failed(from, to, source)),
    }
}

fn collision(to: &Utf8Path) -> ModError {
    ModError::MoveCollision {
        file_name: to.file_name().unwrap_or(to.as_str()).to_string(),
        destination: to.parent().unwrap_or(to).to_path_buf(),
    }
}

fn move_failed(from: &Utf8Path, to: &Utf8Path, source: io::Error) -> ModError {
    ModError::MoveFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

/// Copy the archive when it cannot be renamed or linked in place, then remove the source.
fn copy_across_devices(from: &Utf8Path, to: &Utf8Path, policy: CollisionPolicy) -> ModResult<()> {
    match policy {
        CollisionPolicy::Skip => copy_exclusive(from, to)?,
        CollisionPolicy::Overwrite => copy_via_staging(from, to)?,
    }
    remove_source(from, to)
}

/// Copy into a destination that must not exist yet. A partial copy is removed.
fn copy_exclusive(from: &Utf8Path, to: &Utf8Path) -> ModResult<()> {
    let mut source = fs::File::open(from).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ModError::Vanished(from.to_path_buf()),
        _ => move_failed(from, to, e),
    })?;
    let mut destination = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(collision(to)),
        Err(e) => return Err(move_failed(from, to, e)),
    };

    if let Err(e) = io::copy(&mut source, &mut destination).and_then(|_| destination.sync_all()) {
        drop(destination);
        discard(to);
        return Err(move_failed(from, to, e));
    }
    Ok(())
}

/// Copy into a hidden sibling, then rename it over the destination.
fn copy_via_staging(from: &Utf8Path, to: &Utf8Path) -> ModResult<()> {
    let file_name = to.file_name().unwrap_or("archive.zip");
    let staging = to.with_file_name(format!(".{file_name}.partial"));

    if let Err(e) = fs::copy(from, &staging).and_then(|_| fs::rename(&staging, to)) {
        discard(&staging);
        return Err(move_failed(from, to, e));
    }
    Ok(())
}

fn remove_source(from: &Utf8Path, to: &Utf8Path) -> ModResult<()> {
    remove_source_with(from, to, |path| fs::remove_file(path))
}

/// Drop the source once the destination holds the archive.
///
/// If the source cannot be removed the destination is rolled back, so the
/// archive never ends up in both places.
fn remove_source_with<F>(from: &Utf8Path, to: &Utf8Path, remove: F) -> ModResult<()>
where
    F: FnOnce(&Utf8Path) -> io::Result<()>,
{
    match remove(from) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            discard(to);
            Err(move_failed(from, to, e))
        }
    }
}

fn discard(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {}: {}", path, e),
    }
}
