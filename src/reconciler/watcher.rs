//! OS file notifications for the two mod directories.

use super::{FsChangeKind, FsNotification, ReconcilerHandle};
use crate::error::ModResult;
use crate::models::{GameLayout, ModBucket};
use camino::Utf8PathBuf;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::PathBuf;

/// Forwards notify events for `Mods` and `DisabledMods` to a reconciler.
///
/// Watching stops when this value is dropped.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    watched: Vec<Utf8PathBuf>,
}

impl FsWatcher {
    /// Watch both bucket directories (non-recursively).
    ///
    /// # Errors
    /// [`crate::ModError::Watch`] if a directory cannot be watched
    pub fn start(layout: &GameLayout, handle: ReconcilerHandle) -> ModResult<Self> {
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) => {
                    for notification in map_notify_event(event) {
                        if !handle.notify(notification) {
                            tracing::debug!("watch event dropped because the reconciler stopped");
                        }
                    }
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            }
        })?;

        let mut watched = Vec::new();
        for bucket in ModBucket::ALL {
            let dir = layout.bucket_dir(bucket);
            watcher.watch(dir.as_std_path(), RecursiveMode::NonRecursive)?;
            tracing::info!("Watching {}", dir);
            watched.push(dir);
        }

        Ok(Self {
            _watcher: watcher,
            watched,
        })
    }

    pub fn watched(&self) -> &[Utf8PathBuf] {
        &self.watched
    }
}

/// Translate one notify event into reconciler notifications.
///
/// Renames become a delete of the old path plus a create of the new one.
pub fn map_notify_event(event: Event) -> Vec<FsNotification> {
    let Event { kind, paths, .. } = event;

    if let EventKind::Modify(ModifyKind::Name(mode)) = kind {
        return map_rename(paths, mode);
    }

    let kind = match kind {
        EventKind::Create(_) => FsChangeKind::Created,
        EventKind::Modify(_) => FsChangeKind::Modified,
        EventKind::Remove(_) => FsChangeKind::Deleted,
        _ => return Vec::new(),
    };

    utf8_paths(paths)
        .map(|path| FsNotification { path, kind })
        .collect()
}

fn map_rename(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<FsNotification> {
    match mode {
        RenameMode::Both => {
            let mut paths = utf8_paths(paths);
            let mut notifications = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                notifications.push(FsNotification::deleted(from));
            }
            if let Some(to) = paths.next() {
                notifications.push(FsNotification::created(to));
            }
            notifications
        }
        RenameMode::From => utf8_paths(paths).map(FsNotification::deleted).collect(),
        RenameMode::To => utf8_paths(paths).map(FsNotification::created).collect(),
        RenameMode::Any | RenameMode::Other => utf8_paths(paths)
            .map(|path| {
                if fs::symlink_metadata(&path).is_ok() {
                    FsNotification::created(path)
                } else {
                    FsNotification::deleted(path)
                }
            })
            .collect(),
    }
}

fn utf8_paths(paths: Vec<PathBuf>) -> impl Iterator<Item = Utf8PathBuf> {
    paths.into_iter().filter_map(|path| match Utf8PathBuf::try_from(path) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!("Ignoring non UTF-8 path {:?}", e.into_path_buf());
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_create_modify_remove() {
        let created = map_notify_event(
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/g/Mods/a.zip")),
        );
        assert_eq!(created, vec![FsNotification::created("/g/Mods/a.zip")]);

        let modified = map_notify_event(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(PathBuf::from("/g/Mods/a.zip")),
        );
        assert_eq!(modified[0].kind, FsChangeKind::Modified);

        let removed = map_notify_event(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/g/Mods/a.zip")),
        );
        assert_eq!(removed, vec![FsNotification::deleted("/g/Mods/a.zip")]);
    }

    #[test]
    fn test_rename_both_is_delete_plus_create() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/g/DisabledMods/a.zip"))
            .add_path(PathBuf::from("/g/Mods/a.zip"));

        assert_eq!(
            map_notify_event(event),
            vec![
                FsNotification::deleted("/g/DisabledMods/a.zip"),
                FsNotification::created("/g/Mods/a.zip"),
            ]
        );
    }

    #[test]
    fn test_rename_halves() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/g/Mods/old.zip"));
        assert_eq!(map_notify_event(from)[0].kind, FsChangeKind::Deleted);

        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/g/Mods/new.zip"));
        assert_eq!(map_notify_event(to)[0].kind, FsChangeKind::Created);
    }

    #[test]
    fn test_ambiguous_rename_checks_disk() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(PathBuf::from("/definitely/not/here.zip"));
        assert_eq!(map_notify_event(event)[0].kind, FsChangeKind::Deleted);
    }

    #[test]
    fn test_access_events_ignored() {
        let event = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/g/Mods/a.zip"));
        assert!(map_notify_event(event).is_empty());
    }
}
