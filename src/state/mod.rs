// State management module
//
// This module provides the StateManager which owns the published repository state
// behind Arc<RwLock<T>>, emits change events and gates exclusive operations.

use crate::error::{ModError, ModResult};
use crate::metrics::Metrics;
use crate::models::{ModEntry, SafetyVerdict};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Operations that mutate the mod directories.
///
/// At most one runs at a time; a second attempt is rejected with
/// [`ModError::Busy`] rather than queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Scan,
    Activation,
    Install,
    Delete,
    RestoreBackups,
    ResetBackups,
}

impl OperationKind {
    /// Backup operations must finish before the application may close.
    pub const fn blocks_shutdown(self) -> bool {
        matches!(
            self,
            OperationKind::RestoreBackups | OperationKind::ResetBackups
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::Scan => "scan",
            OperationKind::Activation => "activation change",
            OperationKind::Install => "install",
            OperationKind::Delete => "delete",
            OperationKind::RestoreBackups => "backup restore",
            OperationKind::ResetBackups => "backup reset",
        };
        f.write_str(label)
    }
}

/// Published repository state.
///
/// `entries` is replaced wholesale after every scan, so readers holding an
/// older `Arc` keep a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct RepositoryState {
    pub entries: Arc<Vec<ModEntry>>,

    /// The injector's "online-safe mods only" setting
    pub online_safe_only: bool,

    pub running_operation: Option<OperationKind>,

    pub reconciler_suspended: bool,

    /// Incremented on every published scan
    pub scan_generation: u64,
}

impl RepositoryState {
    pub fn find(&self, identity: &Utf8Path) -> Option<&ModEntry> {
        self.entries.iter().find(|entry| entry.identity == identity)
    }

    /// Look up an entry by file name in either directory.
    pub fn find_by_name(&self, file_name: &str) -> Option<&ModEntry> {
        self.entries
            .iter()
            .find(|entry| entry.display_name.eq_ignore_ascii_case(file_name))
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_active()).count()
    }

    pub fn inactive_count(&self) -> usize {
        self.entries.len() - self.active_count()
    }

    /// Entries the injector will load under the current online-safe setting.
    pub fn loading_entries(&self) -> impl Iterator<Item = &ModEntry> {
        let online_safe_only = self.online_safe_only;
        self.entries
            .iter()
            .filter(move |entry| entry.will_load(online_safe_only))
    }
}

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A scan published an entry that was not in the previous snapshot
    ModAdded { identity: Utf8PathBuf },

    /// A scan no longer observed an entry
    ModRemoved { identity: Utf8PathBuf },

    /// An entry kept its path but was reclassified with a different result
    VerdictChanged {
        identity: Utf8PathBuf,
        verdict: SafetyVerdict,
    },

    /// A new snapshot was published
    RepositoryRescanned {
        generation: u64,
        active: usize,
        inactive: usize,
    },

    OnlineSafeChanged { enabled: bool },

    OperationStarted { kind: OperationKind },

    OperationFinished { kind: OperationKind },

    ReconcilerSuspended,

    ReconcilerResumed,
}

/// Thread-safe owner of the repository state with event emission
///
/// - [`read()`](Self::read) for reading state
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
/// - [`try_begin_operation()`](Self::try_begin_operation) for the exclusive operation gate
pub struct StateManager {
    state: Arc<RwLock<RepositoryState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,

    metrics: Arc<Metrics>,
}

impl StateManager {
    /// Create a new StateManager with empty state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 256 events
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(Metrics::new()))
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        let (state_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(RepositoryState::default())),
            state_tx,
            metrics,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Clone of the current state. Entries are shared, not copied.
    pub fn snapshot(&self) -> RepositoryState {
        self.read(RepositoryState::clone)
    }

    /// Current entry snapshot.
    pub fn entries(&self) -> Arc<Vec<ModEntry>> {
        self.read(|state| Arc::clone(&state.entries))
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RepositoryState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut RepositoryState),
    {
        self.update_with(update_fn).1
    }

    /// Like [`update()`](Self::update), also returning the closure's result.
    fn update_with<F, R>(&self, update_fn: F) -> (R, Vec<StateChange>)
    where
        F: FnOnce(&mut RepositoryState) -> R,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        let result = update_fn(&mut state);

        let changes = detect_changes(&old_state, &state);
        self.metrics.record_state_update();

        for change in &changes {
            // It's OK if no one is listening
            if self.state_tx.send(change.clone()).is_ok() {
                self.metrics.record_state_broadcast();
            }
        }

        (result, changes)
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Swap in a freshly built entry snapshot.
    pub fn publish_scan(&self, entries: Vec<ModEntry>) -> Vec<StateChange> {
        let entries = Arc::new(entries);
        self.update(|state| {
            state.entries = entries;
            state.scan_generation += 1;
        })
    }

    pub fn set_online_safe_only(&self, enabled: bool) -> Vec<StateChange> {
        self.update(|state| state.online_safe_only = enabled)
    }

    pub fn set_reconciler_suspended(&self, suspended: bool) -> Vec<StateChange> {
        self.update(|state| state.reconciler_suspended = suspended)
    }

    /// Claim the repository for an exclusive operation.
    ///
    /// # Returns
    /// A guard that releases the claim when dropped, or [`ModError::Busy`]
    /// naming the operation already running
    pub fn try_begin_operation(&self, kind: OperationKind) -> ModResult<OperationGuard> {
        let (claimed, _) = self.update_with(|state| match state.running_operation {
            Some(running) => Err(running),
            None => {
                state.running_operation = Some(kind);
                Ok(())
            }
        });

        match claimed {
            Ok(()) => Ok(OperationGuard {
                manager: self.clone(),
                kind,
            }),
            Err(running) => {
                tracing::debug!("Rejected {} while {} is running", kind, running);
                Err(ModError::Busy { running })
            }
        }
    }

    pub fn running_operation(&self) -> Option<OperationKind> {
        self.read(|state| state.running_operation)
    }

    pub fn is_idle(&self) -> bool {
        self.running_operation().is_none()
    }

    /// False while a backup restore or reset is in flight.
    pub fn can_shutdown(&self) -> bool {
        !self
            .running_operation()
            .is_some_and(OperationKind::blocks_shutdown)
    }
}

/// Detect what changed between two states and generate events
fn detect_changes(old: &RepositoryState, new: &RepositoryState) -> Vec<StateChange> {
    let mut changes = Vec::new();

    if old.running_operation != new.running_operation {
        if let Some(kind) = old.running_operation {
            changes.push(StateChange::OperationFinished { kind });
        }
        if let Some(kind) = new.running_operation {
            changes.push(StateChange::OperationStarted { kind });
        }
    }

    if !Arc::ptr_eq(&old.entries, &new.entries) {
        let previous: HashMap<&Utf8Path, &ModEntry> = old
            .entries
            .iter()
            .map(|entry| (entry.identity.as_path(), entry))
            .collect();
        let current: HashMap<&Utf8Path, &ModEntry> = new
            .entries
            .iter()
            .map(|entry| (entry.identity.as_path(), entry))
            .collect();

        for entry in new.entries.iter() {
            match previous.get(entry.identity.as_path()) {
                None => changes.push(StateChange::ModAdded {
                    identity: entry.identity.clone(),
                }),
                Some(before) if before.multiplayer_safe != entry.multiplayer_safe => {
                    changes.push(StateChange::VerdictChanged {
                        identity: entry.identity.clone(),
                        verdict: entry.multiplayer_safe,
                    })
                }
                Some(_) => {}
            }
        }

        for entry in old.entries.iter() {
            if !current.contains_key(entry.identity.as_path()) {
                changes.push(StateChange::ModRemoved {
                    identity: entry.identity.clone(),
                });
            }
        }
    }

    if old.scan_generation != new.scan_generation {
        changes.push(StateChange::RepositoryRescanned {
            generation: new.scan_generation,
            active: new.active_count(),
            inactive: new.inactive_count(),
        });
    }

    if old.online_safe_only != new.online_safe_only {
        changes.push(StateChange::OnlineSafeChanged {
            enabled: new.online_safe_only,
        });
    }

    if old.reconciler_suspended != new.reconciler_suspended {
        changes.push(if new.reconciler_suspended {
            StateChange::ReconcilerSuspended
        } else {
            StateChange::ReconcilerResumed
        });
    }

    changes
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across threads
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Exclusive claim on the mod directories, released on drop.
#[must_use = "the operation is released as soon as the guard is dropped"]
pub struct OperationGuard {
    manager: StateManager,
    kind: OperationKind,
}

impl OperationGuard {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl fmt::Debug for OperationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationGuard")
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let kind = self.kind;
        self.manager.update(|state| {
            if state.running_operation == Some(kind) {
                state.running_operation = None;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModBucket;

    fn entry(name: &str, bucket: ModBucket, verdict: SafetyVerdict) -> ModEntry {
        ModEntry::new(
            Utf8PathBuf::from("/game").join(bucket.dir_name()).join(name),
            bucket,
            verdict,
            true,
            None,
        )
    }

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();

        assert!(state.entries.is_empty());
        assert!(state.running_operation.is_none());
        assert!(!state.online_safe_only);
        assert_eq!(state.scan_generation, 0);
    }

    #[test]
    fn test_publish_scan_emits_added_and_rescanned() {
        let manager = StateManager::new();

        let changes = manager.publish_scan(vec![
            entry("a.zip", ModBucket::Enabled, SafetyVerdict::Safe),
            entry("b.zip", ModBucket::Disabled, SafetyVerdict::Unsafe),
        ]);

        assert_eq!(changes.len(), 3);
        assert!(matches!(changes[0], StateChange::ModAdded { .. }));
        assert!(matches!(changes[1], StateChange::ModAdded { .. }));
        assert_eq!(
            changes[2],
            StateChange::RepositoryRescanned {
                generation: 1,
                active: 1,
                inactive: 1
            }
        );
    }

    #[test]
    fn test_publish_scan_detects_removal_and_verdict_change() {
        let manager = StateManager::new();
        manager.publish_scan(vec![
            entry("a.zip", ModBucket::Enabled, SafetyVerdict::Safe),
            entry("b.zip", ModBucket::Enabled, SafetyVerdict::Safe),
        ]);

        let changes = manager.publish_scan(vec![entry(
            "a.zip",
            ModBucket::Enabled,
            SafetyVerdict::Unsafe,
        )]);

        assert!(changes.iter().any(|c| matches!(
            c,
            StateChange::VerdictChanged {
                verdict: SafetyVerdict::Unsafe,
                ..
            }
        )));
        assert!(changes.iter().any(|c| matches!(
            c,
            StateChange::ModRemoved { identity } if identity.as_str().ends_with("b.zip")
        )));
    }

    #[test]
    fn test_move_between_buckets_is_remove_plus_add() {
        let manager = StateManager::new();
        manager.publish_scan(vec![entry("a.zip", ModBucket::Disabled, SafetyVerdict::Safe)]);

        let changes =
            manager.publish_scan(vec![entry("a.zip", ModBucket::Enabled, SafetyVerdict::Safe)]);

        assert!(changes.iter().any(|c| matches!(c, StateChange::ModAdded { .. })));
        assert!(changes.iter().any(|c| matches!(c, StateChange::ModRemoved { .. })));
    }

    #[test]
    fn test_operation_gate_rejects_second_claim() {
        let manager = StateManager::new();

        let guard = manager.try_begin_operation(OperationKind::Activation).unwrap();
        assert_eq!(guard.kind(), OperationKind::Activation);

        let rejected = manager.try_begin_operation(OperationKind::Scan);
        assert!(matches!(
            rejected,
            Err(ModError::Busy {
                running: OperationKind::Activation
            })
        ));

        drop(guard);
        assert!(manager.is_idle());
        assert!(manager.try_begin_operation(OperationKind::Scan).is_ok());
    }

    #[test]
    fn test_operation_events() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        {
            let _guard = manager.try_begin_operation(OperationKind::Delete).unwrap();
        }

        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::OperationStarted {
                kind: OperationKind::Delete
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::OperationFinished {
                kind: OperationKind::Delete
            }
        );
    }

    #[test]
    fn test_can_shutdown_blocked_by_backup_restore() {
        let manager = StateManager::new();
        assert!(manager.can_shutdown());

        let guard = manager
            .try_begin_operation(OperationKind::RestoreBackups)
            .unwrap();
        assert!(!manager.can_shutdown());
        drop(guard);

        let _scan = manager.try_begin_operation(OperationKind::Scan).unwrap();
        assert!(manager.can_shutdown());
    }

    #[test]
    fn test_online_safe_change() {
        let manager = StateManager::new();
        let changes = manager.set_online_safe_only(true);
        assert_eq!(changes, vec![StateChange::OnlineSafeChanged { enabled: true }]);

        assert!(manager.set_online_safe_only(true).is_empty());
    }

    #[test]
    fn test_loading_entries_follow_online_safe_setting() {
        let manager = StateManager::new();
        manager.publish_scan(vec![
            entry("safe.zip", ModBucket::Enabled, SafetyVerdict::Safe),
            entry("unsafe.zip", ModBucket::Enabled, SafetyVerdict::Unsafe),
            entry("off.zip", ModBucket::Disabled, SafetyVerdict::Safe),
        ]);

        assert_eq!(manager.read(|s| s.loading_entries().count()), 2);
        manager.set_online_safe_only(true);
        assert_eq!(manager.read(|s| s.loading_entries().count()), 1);
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();

        manager1.set_reconciler_suspended(true);
        assert!(manager2.snapshot().reconciler_suspended);
    }

    #[test]
    fn test_find_by_name() {
        let manager = StateManager::new();
        manager.publish_scan(vec![entry("Hud.zip", ModBucket::Enabled, SafetyVerdict::Safe)]);
        assert!(manager.read(|s| s.find_by_name("hud.zip").is_some()));
        assert!(manager.read(|s| s.find_by_name("other.zip").is_none()));
    }
}
