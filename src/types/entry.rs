use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
  /// The cached value reflects the last known server truth.
  Fresh,
  /// The value is known-possibly-outdated; a refresh should occur.
  Stale,
  /// A read for this key is in flight.
  Pending,
}

/// One cached value with its lifecycle metadata. Owned by `CacheStore`;
/// exactly one entry exists per distinct key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  pub value: Option<serde_json::Value>,
  pub updated_at: DateTime<Utc>,
  pub state: EntryState,
  /// Bumped on every value write. Rollback guard for overlapping mutations.
  pub version: u64,
  /// Last refetch failure, surfaced to watchers. Cleared on a value write.
  pub error: Option<String>,
}

impl CacheEntry {
  /// An entry with no value yet, e.g. just created by a state transition.
  pub fn absent() -> Self {
    Self {
      value: None,
      updated_at: Utc::now(),
      state: EntryState::Fresh,
      version: 0,
      error: None,
    }
  }

  pub fn is_stale(&self) -> bool {
    self.state == EntryState::Stale
  }

  pub fn snapshot(&self) -> EntrySnapshot {
    EntrySnapshot {
      value: self.value.clone(),
      state: self.state,
      error: self.error.clone(),
      version: self.version,
    }
  }
}

/// Point-in-time view of an entry, as delivered to watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
  pub value: Option<serde_json::Value>,
  pub state: EntryState,
  pub error: Option<String>,
  pub version: u64,
}

impl EntrySnapshot {
  /// The view published when an entry is removed.
  pub fn absent() -> Self {
    Self {
      value: None,
      state: EntryState::Fresh,
      error: None,
      version: 0,
    }
  }
}
