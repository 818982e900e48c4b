// Swap registry: authoritative store of swap records

pub mod storage;

pub use storage::{InMemoryStorage, JsonFileStorage, RegistryStorage};

use crate::data_structures::{SwapId, SwapRecord, SwapView};
use crate::error::{StorageError, SwapError};
use chrono::Utc;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct RegistryState {
    swaps: HashMap<SwapId, SwapRecord>,
    // participant key -> swap ids
    by_participant: HashMap<String, BTreeSet<SwapId>>,
}

impl RegistryState {
    fn index(&mut self, record: &SwapRecord) {
        for account in record.accounts() {
            self.by_participant
                .entry(participant_key(account))
                .or_default()
                .insert(record.swap_id.clone());
        }
    }

    fn unindex(&mut self, record: &SwapRecord) {
        for account in record.accounts() {
            let key = participant_key(account);
            if let Some(ids) = self.by_participant.get_mut(&key) {
                ids.remove(&record.swap_id);
                if ids.is_empty() {
                    self.by_participant.remove(&key);
                }
            }
        }
    }

    fn snapshot_with(&self, changed: &SwapRecord) -> Vec<SwapRecord> {
        let mut records: Vec<SwapRecord> = self
            .swaps
            .values()
            .filter(|r| r.swap_id != changed.swap_id)
            .cloned()
            .collect();
        records.push(changed.clone());
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.swap_id.cmp(&b.swap_id))
        });
        records
    }
}

// EVM addresses are case-insensitive, bech32 addresses are already lowercase.
fn participant_key(account: &str) -> String {
    account.trim().to_lowercase()
}

/// Exclusive hold on one swap, see [`SwapRegistry::lock_swap`].
#[derive(Debug)]
pub struct SwapGuard<'a> {
    registry: &'a SwapRegistry,
    swap_id: SwapId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry.release_lock(&self.swap_id);
    }
}

/// Swap records keyed by source-chain swap id, with a participant index kept
/// in step with every write and a snapshot written through `storage`.
#[derive(Debug)]
pub struct SwapRegistry {
    state: RwLock<RegistryState>,
    swap_locks: Mutex<HashMap<SwapId, Arc<AsyncMutex<()>>>>,
    storage: Box<dyn RegistryStorage>,
}

impl SwapRegistry {
    pub fn new(storage: Box<dyn RegistryStorage>) -> Result<Self, StorageError> {
        let mut state = RegistryState::default();
        for record in storage.load()? {
            state.index(&record);
            state.swaps.insert(record.swap_id.clone(), record);
        }
        if !state.swaps.is_empty() {
            info!("[Registry] Restored {} swaps from storage", state.swaps.len());
        }
        Ok(SwapRegistry {
            state: RwLock::new(state),
            swap_locks: Mutex::new(HashMap::new()),
            storage,
        })
    }

    pub fn in_memory() -> Self {
        SwapRegistry {
            state: RwLock::new(RegistryState::default()),
            swap_locks: Mutex::new(HashMap::new()),
            storage: Box::new(InMemoryStorage::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serialises every read-modify-write cycle on one swap, including the
    /// ledger calls in between. The per-swap mutex is dropped from the map
    /// once the last guard or waiter is gone.
    pub async fn lock_swap(&self, swap_id: &str) -> SwapGuard<'_> {
        let lock = {
            let mut locks = self.locks();
            Arc::clone(locks.entry(swap_id.to_string()).or_default())
        };
        SwapGuard {
            registry: self,
            swap_id: swap_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of swap ids with a live lock entry.
    pub fn tracked_locks(&self) -> usize {
        self.locks().len()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<SwapId, Arc<AsyncMutex<()>>>> {
        self.swap_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_lock(&self, swap_id: &str) {
        let mut locks = self.locks();
        // Waiters clone the Arc under this map lock, so a count of one means
        // nobody else holds or awaits it.
        if locks.get(swap_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(swap_id);
        }
    }

    /// Inserts a new record. Existing ids are never overwritten.
    pub fn insert(&self, record: SwapRecord) -> Result<SwapView, SwapError> {
        let mut state = self.write();
        if state.swaps.contains_key(&record.swap_id) {
            return Err(SwapError::AlreadyExists(record.swap_id));
        }
        self.storage.save(&state.snapshot_with(&record))?;
        state.index(&record);
        let view = record.view();
        info!(
            "[Registry] Stored swap {} ({} -> {})",
            record.swap_id, record.from_chain, record.to_chain
        );
        state.swaps.insert(record.swap_id.clone(), record);
        Ok(view)
    }

    /// Public view of a swap. Never exposes the secret.
    pub fn get(&self, swap_id: &str) -> Option<SwapView> {
        self.read().swaps.get(swap_id).map(SwapRecord::view)
    }

    /// Full record including the secret, for the coordinator.
    pub fn get_internal(&self, swap_id: &str) -> Option<SwapRecord> {
        self.read().swaps.get(swap_id).cloned()
    }

    /// Applies `mutate` to a copy of the record and commits it if the
    /// hashlock and secret are unchanged and the status only moved forward.
    pub fn update<F>(&self, swap_id: &str, mutate: F) -> Result<SwapRecord, SwapError>
    where
        F: FnOnce(&mut SwapRecord),
    {
        let mut state = self.write();
        let current = state
            .swaps
            .get(swap_id)
            .cloned()
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;

        let mut updated = current.clone();
        mutate(&mut updated);

        if updated.swap_id != current.swap_id
            || updated.hashlock != current.hashlock
            || updated.secret != current.secret
        {
            return Err(SwapError::HashlockChanged(swap_id.to_string()));
        }
        if !current.status.can_transition_to(updated.status) {
            return Err(SwapError::InvalidTransition {
                swap_id: swap_id.to_string(),
                from: current.status,
                to: updated.status,
            });
        }
        if updated == current {
            return Ok(current);
        }
        updated.updated_at = Utc::now();

        self.storage.save(&state.snapshot_with(&updated))?;
        state.unindex(&current);
        state.index(&updated);
        if updated.status != current.status {
            debug!(
                "[Registry] Swap {} moved {} -> {}",
                swap_id, current.status, updated.status
            );
        }
        state.swaps.insert(swap_id.to_string(), updated.clone());
        Ok(updated)
    }

    pub fn swaps_for_participant(&self, account: &str) -> Vec<SwapView> {
        let state = self.read();
        state
            .by_participant
            .get(&participant_key(account))
            .into_iter()
            .flatten()
            .filter_map(|id| state.swaps.get(id))
            .map(SwapRecord::view)
            .collect()
    }

    /// Ids of swaps the coordinator still has to drive, oldest first.
    pub fn non_terminal_ids(&self) -> Vec<SwapId> {
        let state = self.read();
        let mut open: Vec<&SwapRecord> = state
            .swaps
            .values()
            .filter(|r| !r.status.is_terminal())
            .collect();
        open.sort_by_key(|r| r.created_at);
        open.into_iter().map(|r| r.swap_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
