use std::future::Future;
use std::sync::Arc;

use crate::coordinator::QueryCoordinator;
use crate::store::CacheStore;
use crate::types::{MutationError, QueryKey, TransportError};

/// Snapshot taken at the start of one mutation attempt. Consumed exactly
/// once by either the success or the failure path; never persisted.
#[derive(Debug, Clone)]
struct MutationContext {
  key: QueryKey,
  previous_value: Option<serde_json::Value>,
  /// Version the optimistic apply will produce. Rollback is valid only
  /// while no other writer has moved the entry past it.
  snapshot_version: u64,
}

/// Marks the key stale exactly once per mutation attempt, even when the
/// mutation future is dropped mid-await.
struct SettleGuard {
  store: Arc<CacheStore>,
  key: QueryKey,
  armed: bool,
}

impl SettleGuard {
  fn new(store: Arc<CacheStore>, key: QueryKey) -> Self {
    Self {
      store,
      key,
      armed: true,
    }
  }

  fn settle(mut self) {
    self.armed = false;
    self.store.mark_stale(&self.key);
  }
}

impl Drop for SettleGuard {
  fn drop(&mut self) {
    if self.armed {
      tracing::debug!(key = %self.key, "mutation abandoned, settling");
      self.store.mark_stale(&self.key);
    }
  }
}

/// Executes one write with optimistic feedback and guaranteed cache
/// convergence: cancel in-flight reads, snapshot, optimistic apply, remote
/// call, commit or rollback, settle.
pub struct MutationRunner {
  store: Arc<CacheStore>,
  coordinator: Arc<QueryCoordinator>,
}

impl MutationRunner {
  pub fn new(store: Arc<CacheStore>, coordinator: Arc<QueryCoordinator>) -> Self {
    Self { store, coordinator }
  }

  /// Run one optimistic mutation. `write` is the remote call; it may
  /// suspend for an unbounded duration and no lock is held on the key
  /// while it does.
  ///
  /// The optimistic value is visible to all watchers before `write`
  /// resolves. On failure the snapshot is restored, unless a later write
  /// already owns the entry (version guard). Success or failure, the entry
  /// is marked stale exactly once so a refetch converges it to server
  /// truth. No automatic retries.
  pub async fn run<F>(
    &self,
    key: &QueryKey,
    new_value: serde_json::Value,
    write: F,
  ) -> Result<serde_json::Value, MutationError>
  where
    F: Future<Output = Result<serde_json::Value, TransportError>>,
  {
    // A slow in-flight read must not land after the optimistic value and
    // clobber it; its cancellation is acknowledged before the apply below.
    self.coordinator.cancel_in_flight(key);

    let context = MutationContext {
      key: key.clone(),
      previous_value: self.store.get(key),
      snapshot_version: self.store.version(key) + 1,
    };

    let guard = SettleGuard::new(self.store.clone(), key.clone());

    self.store.set(key, new_value);
    tracing::debug!(key = %key, "optimistic value applied");

    let outcome = match write.await {
      Ok(committed) => Ok(committed),
      Err(err) => {
        let rolled_back = self.store.rollback(
          &context.key,
          context.previous_value,
          context.snapshot_version,
        );
        if rolled_back {
          tracing::debug!(key = %key, error = %err, "mutation failed, snapshot restored");
        } else {
          tracing::warn!(
            key = %key,
            error = %err,
            "mutation failed, rollback skipped: entry overwritten since snapshot"
          );
        }
        Err(MutationError::Transport(err))
      }
    };

    guard.settle();
    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::EntryState;
  use serde_json::json;

  fn key() -> QueryKey {
    QueryKey::from(["events", "e1"])
  }

  #[test]
  fn test_settle_guard_fires_on_drop() {
    let store = Arc::new(CacheStore::new(16));
    store.set(&key(), json!("a"));

    let guard = SettleGuard::new(store.clone(), key());
    drop(guard);

    assert_eq!(store.state(&key()), Some(EntryState::Stale));
  }

  #[test]
  fn test_settle_guard_fires_once_when_settled() {
    let store = Arc::new(CacheStore::new(16));
    store.set(&key(), json!("a"));
    let mut watcher = store.watch(&key());

    let guard = SettleGuard::new(store.clone(), key());
    guard.settle();

    // Exactly one stale transition was published.
    let update = watcher.try_next().unwrap();
    assert_eq!(update.state, EntryState::Stale);
    assert!(watcher.try_next().is_none());
  }
}
