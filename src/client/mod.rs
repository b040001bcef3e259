use std::sync::Arc;

use crate::config::ClientConfig;
use crate::coordinator::QueryCoordinator;
use crate::mutation::MutationRunner;
use crate::store::{CacheStore, Watcher};
use crate::transport::RemoteTransport;
use crate::types::{EntryState, MutationError, QueryKey};

/// Read-side state reported by `begin_edit`, mirroring what a consumer
/// renders: a usable value, a spinner, or an error block.
#[derive(Debug, Clone, PartialEq)]
pub enum EditState {
  /// A usable value is available (possibly stale, with a refresh running).
  Ready(serde_json::Value),
  /// No usable value yet; a read is in flight.
  Pending,
  /// The last read failed.
  Failed(String),
}

/// One session's cache-synchronization surface. Owns the store and all
/// coordination state; construct once per session, inject where needed,
/// and `close` at session end.
pub struct QueryClient {
  store: Arc<CacheStore>,
  coordinator: Arc<QueryCoordinator>,
  runner: MutationRunner,
  transport: Arc<dyn RemoteTransport>,
  config: ClientConfig,
}

impl QueryClient {
  pub fn new(transport: Arc<dyn RemoteTransport>, config: ClientConfig) -> Self {
    let store = Arc::new(CacheStore::new(config.watch_capacity));
    let coordinator = Arc::new(QueryCoordinator::new(store.clone(), transport.clone()));
    let runner = MutationRunner::new(store.clone(), coordinator.clone());
    tracing::info!("query client session opened");
    Self {
      store,
      coordinator,
      runner,
      transport,
      config,
    }
  }

  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  pub fn coordinator(&self) -> &Arc<QueryCoordinator> {
    &self.coordinator
  }

  /// Drive the read side of an edit. A cached value is returned
  /// immediately, stale-while-revalidate style (a stale entry also kicks
  /// off a background refresh); an absent entry starts a read and reports
  /// `Pending`; a previously failed read reports `Failed`.
  pub fn begin_edit(&self, key: &QueryKey) -> EditState {
    if let Some(snapshot) = self.store.snapshot(key) {
      if let Some(value) = snapshot.value {
        if snapshot.state == EntryState::Stale {
          self.spawn_refetch(key);
        }
        return EditState::Ready(value);
      }
      if snapshot.state == EntryState::Pending {
        return EditState::Pending;
      }
      if let Some(message) = snapshot.error {
        return EditState::Failed(message);
      }
    }
    self.spawn_refetch(key);
    EditState::Pending
  }

  /// Run the optimistic mutation for a key against the transport. On
  /// success the committed value is returned; on failure the cache has
  /// already rolled back and the error is reported exactly once. Either
  /// way the entry is marked stale, and when `refetch_after_mutation` is
  /// set a refresh is started so the cache converges to server truth.
  pub async fn submit_edit(
    &self,
    key: &QueryKey,
    new_value: serde_json::Value,
  ) -> Result<serde_json::Value, MutationError> {
    let write = self.transport.write(key, new_value.clone());
    let result = self.runner.run(key, new_value, write).await;
    if self.config.refetch_after_mutation {
      self.spawn_refetch(key);
    }
    result
  }

  /// Register a watcher for a key. When the entry is already stale and
  /// `refetch_on_subscribe` is set, a refresh is started so the new
  /// consumer converges without further prompting.
  pub fn subscribe(&self, key: &QueryKey) -> Watcher {
    let watcher = self.store.watch(key);
    if self.config.refetch_on_subscribe && self.coordinator.is_stale(key) {
      self.spawn_refetch(key);
    }
    watcher
  }

  /// End the session: cancel every in-flight read and disconnect all
  /// watchers. Idempotent.
  pub fn close(&self) {
    self.coordinator.close();
    self.store.close();
    tracing::info!("query client session closed");
  }

  fn spawn_refetch(&self, key: &QueryKey) {
    let coordinator = self.coordinator.clone();
    let key = key.clone();
    tokio::spawn(async move {
      // Cancelled reads are routine (superseded by a write); transport
      // failures are already recorded on the entry.
      let _ = coordinator.refetch(&key).await;
    });
  }
}
