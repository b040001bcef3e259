use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::types::{CacheEntry, EntrySnapshot, EntryState, QueryKey};

/// One change to a cache entry, fanned out to watchers.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
  pub key: QueryKey,
  pub snapshot: EntrySnapshot,
}

struct Inner {
  entries: HashMap<QueryKey, CacheEntry>,
  /// `None` once the store is closed; watchers then drain and disconnect.
  tx: Option<broadcast::Sender<CacheUpdate>>,
}

/// Key-addressed store of cached values and their lifecycle state.
///
/// The single shared mutable resource of the protocol. All writes go through
/// `set`/`mark_*`/`rollback`/`delete`, serialized behind one lock, so a
/// watcher never observes a half-applied entry. Updates are published while
/// the lock is held, in the order the changes occurred.
pub struct CacheStore {
  inner: RwLock<Inner>,
}

impl CacheStore {
  pub fn new(watch_capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(watch_capacity.max(1));
    Self {
      inner: RwLock::new(Inner {
        entries: HashMap::new(),
        tx: Some(tx),
      }),
    }
  }

  /// Current cached value for a key. No side effects.
  pub fn get(&self, key: &QueryKey) -> Option<serde_json::Value> {
    self.inner.read().entries.get(key).and_then(|e| e.value.clone())
  }

  /// Point-in-time view of the entry, `None` when the key is absent.
  pub fn snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot> {
    self.inner.read().entries.get(key).map(|e| e.snapshot())
  }

  pub fn state(&self, key: &QueryKey) -> Option<EntryState> {
    self.inner.read().entries.get(key).map(|e| e.state)
  }

  /// The entry's current version, 0 when absent.
  pub fn version(&self, key: &QueryKey) -> u64 {
    self.inner.read().entries.get(key).map(|e| e.version).unwrap_or(0)
  }

  /// Exclusive overwrite of the entry's value. Bumps the version, stamps
  /// `updated_at`, clears any recorded error; the lifecycle state is left
  /// unchanged.
  pub fn set(&self, key: &QueryKey, value: serde_json::Value) {
    self.write_value(key, Some(value), None);
  }

  /// Like `set`, but with an explicit state transition in the same atomic
  /// update (e.g. a refetch landing marks the entry Fresh).
  pub fn set_with_state(&self, key: &QueryKey, value: serde_json::Value, state: EntryState) {
    self.write_value(key, Some(value), Some(state));
  }

  /// Restore a snapshot taken before an optimistic write, but only while
  /// `expected_version` is still the entry's current version. Returns
  /// whether the rollback was applied; a mismatch means a later write owns
  /// the entry and the snapshot is obsolete.
  pub fn rollback(
    &self,
    key: &QueryKey,
    value: Option<serde_json::Value>,
    expected_version: u64,
  ) -> bool {
    let mut inner = self.inner.write();
    let snapshot = {
      let Some(entry) = inner.entries.get_mut(key) else {
        return false;
      };
      if entry.version != expected_version {
        return false;
      }
      entry.value = value;
      entry.version += 1;
      entry.updated_at = Utc::now();
      entry.error = None;
      entry.snapshot()
    };
    tracing::debug!(key = %key, version = snapshot.version, "rollback applied");
    publish(&inner, key, snapshot);
    true
  }

  /// Mark a read as in flight. Creates the entry if the key was never
  /// cached before.
  pub fn mark_pending(&self, key: &QueryKey) {
    self.transition(key, EntryState::Pending, true);
  }

  /// Signal consumers that a refresh should occur. The value is kept so the
  /// UI can keep showing it until the refetch lands.
  pub fn mark_stale(&self, key: &QueryKey) {
    self.transition(key, EntryState::Stale, false);
  }

  pub fn mark_fresh(&self, key: &QueryKey) {
    self.transition(key, EntryState::Fresh, false);
  }

  /// Record a refetch failure. Leaves the value untouched and puts the
  /// entry back to Stale so a later subscriber retries the refresh.
  pub fn set_error(&self, key: &QueryKey, message: &str) {
    let mut inner = self.inner.write();
    let snapshot = {
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::absent);
      entry.error = Some(message.to_string());
      entry.state = EntryState::Stale;
      entry.snapshot()
    };
    publish(&inner, key, snapshot);
  }

  /// Remove the entry entirely. Teardown only, not part of the normal
  /// mutation flow.
  pub fn delete(&self, key: &QueryKey) {
    let mut inner = self.inner.write();
    if inner.entries.remove(key).is_some() {
      publish(&inner, key, EntrySnapshot::absent());
    }
  }

  /// Register interest in one key. Every change to that entry is delivered
  /// in order; dropping the watcher unregisters it.
  pub fn watch(&self, key: &QueryKey) -> Watcher {
    let inner = self.inner.read();
    let rx = match &inner.tx {
      Some(tx) => tx.subscribe(),
      None => {
        // Store already closed: hand out a receiver that reports Closed.
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        rx
      }
    };
    Watcher {
      key: key.clone(),
      rx,
    }
  }

  /// Disconnect all watchers. Entries stay readable; no further updates are
  /// published. Idempotent.
  pub fn close(&self) {
    self.inner.write().tx = None;
  }

  pub fn is_closed(&self) -> bool {
    self.inner.read().tx.is_none()
  }

  fn write_value(
    &self,
    key: &QueryKey,
    value: Option<serde_json::Value>,
    state: Option<EntryState>,
  ) {
    let mut inner = self.inner.write();
    let snapshot = {
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::absent);
      entry.value = value;
      entry.version += 1;
      entry.updated_at = Utc::now();
      entry.error = None;
      if let Some(state) = state {
        entry.state = state;
      }
      entry.snapshot()
    };
    tracing::debug!(key = %key, version = snapshot.version, "cache set");
    publish(&inner, key, snapshot);
  }

  fn transition(&self, key: &QueryKey, state: EntryState, create_missing: bool) {
    let mut inner = self.inner.write();
    let snapshot = if create_missing {
      let entry = inner.entries.entry(key.clone()).or_insert_with(CacheEntry::absent);
      entry.state = state;
      Some(entry.snapshot())
    } else {
      inner.entries.get_mut(key).map(|entry| {
        entry.state = state;
        entry.snapshot()
      })
    };
    if let Some(snapshot) = snapshot {
      tracing::debug!(key = %key, state = ?state, "state transition");
      publish(&inner, key, snapshot);
    }
  }
}

fn publish(inner: &Inner, key: &QueryKey, snapshot: EntrySnapshot) {
  if let Some(tx) = &inner.tx {
    // No receivers is fine; updates are fire-and-forget.
    let _ = tx.send(CacheUpdate {
      key: key.clone(),
      snapshot,
    });
  }
}

/// Observer handle for one key. Updates for other keys are filtered out.
pub struct Watcher {
  key: QueryKey,
  rx: broadcast::Receiver<CacheUpdate>,
}

impl Watcher {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Next update for the watched key, in publish order. `None` once the
  /// store is closed.
  pub async fn next(&mut self) -> Option<EntrySnapshot> {
    loop {
      match self.rx.recv().await {
        Ok(update) if update.key == self.key => return Some(update.snapshot),
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::warn!(key = %self.key, skipped, "watcher lagged, updates dropped");
          continue;
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Non-blocking variant of `next`. `None` when no update is queued for
  /// the watched key (or the store is closed).
  pub fn try_next(&mut self) -> Option<EntrySnapshot> {
    loop {
      match self.rx.try_recv() {
        Ok(update) if update.key == self.key => return Some(update.snapshot),
        Ok(_) => continue,
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
          tracing::warn!(key = %self.key, skipped, "watcher lagged, updates dropped");
          continue;
        }
        Err(_) => return None,
      }
    }
  }
}
