use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::CacheStore;
use crate::transport::RemoteTransport;
use crate::types::{EntryState, FetchError, QueryKey};

/// A read in progress for one key. Destroyed when the read completes, is
/// superseded, or is explicitly cancelled.
struct InFlightRead {
  id: Uuid,
  token: CancellationToken,
}

/// Issues and cancels reads against keys, and keeps a guaranteed-stale read
/// result from ever landing in the store.
pub struct QueryCoordinator {
  store: Arc<CacheStore>,
  transport: Arc<dyn RemoteTransport>,
  in_flight: RwLock<HashMap<QueryKey, InFlightRead>>,
}

impl QueryCoordinator {
  pub fn new(store: Arc<CacheStore>, transport: Arc<dyn RemoteTransport>) -> Self {
    Self {
      store,
      transport,
      in_flight: RwLock::new(HashMap::new()),
    }
  }

  /// Request cancellation of any read in flight for this key and drop it
  /// from the bookkeeping. Returns whether a read was cancelled.
  ///
  /// Cancellation is cooperative: the transport call may still run to
  /// completion, but its result is discarded, never written to the store.
  pub fn cancel_in_flight(&self, key: &QueryKey) -> bool {
    match self.in_flight.write().remove(key) {
      Some(read) => {
        read.token.cancel();
        tracing::debug!(key = %key, read = %read.id, "cancelled in-flight read");
        true
      }
      None => false,
    }
  }

  /// Whether a read is currently in flight for this key.
  pub fn in_flight(&self, key: &QueryKey) -> bool {
    self.in_flight.read().contains_key(key)
  }

  /// Whether the cached entry wants a refresh.
  pub fn is_stale(&self, key: &QueryKey) -> bool {
    self.store.state(key) == Some(EntryState::Stale)
  }

  /// Fetch the key's current server value and store it, superseding any
  /// previous read for the key. On success the entry becomes Fresh; on
  /// transport failure the previous value is left untouched and the error
  /// is surfaced to watchers. A cancelled read resolves to
  /// `FetchError::Cancelled` and leaves the store untouched.
  pub async fn refetch(&self, key: &QueryKey) -> Result<serde_json::Value, FetchError> {
    self.cancel_in_flight(key);

    let token = CancellationToken::new();
    let id = Uuid::new_v4();
    self.in_flight.write().insert(
      key.clone(),
      InFlightRead {
        id,
        token: token.clone(),
      },
    );
    self.store.mark_pending(key);
    tracing::debug!(key = %key, read = %id, "refetch started");

    let fetched = tokio::select! {
      _ = token.cancelled() => Err(FetchError::Cancelled),
      result = self.transport.fetch(key) => result.map_err(FetchError::from),
    };

    // Bookkeeping and apply happen under the in-flight lock: a concurrent
    // cancel either lands before this write or forces a discard, never
    // after the optimistic value it protects.
    let mut in_flight = self.in_flight.write();
    let current = in_flight.get(key).is_some_and(|read| read.id == id);
    if current {
      in_flight.remove(key);
    }
    if !current || token.is_cancelled() {
      tracing::debug!(key = %key, read = %id, "discarding cancelled read result");
      return Err(FetchError::Cancelled);
    }

    match fetched {
      Ok(value) => {
        self.store.set_with_state(key, value.clone(), EntryState::Fresh);
        Ok(value)
      }
      Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
      Err(FetchError::Transport(err)) => {
        tracing::warn!(key = %key, error = %err, "refetch failed");
        self.store.set_error(key, &err.message);
        Err(FetchError::Transport(err))
      }
    }
  }

  /// Cancel every in-flight read. Part of session teardown.
  pub fn close(&self) {
    let mut in_flight = self.in_flight.write();
    for (key, read) in in_flight.drain() {
      read.token.cancel();
      tracing::debug!(key = %key, read = %read.id, "cancelled read at teardown");
    }
  }
}
