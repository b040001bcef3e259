//! Optimistic mutation tests - snapshot, rollback, settle, overlap guard

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use querysync::{
  CacheStore, ChannelTransport, EntryState, MutationError, MutationRunner, QueryCoordinator,
  QueryKey, TransportError, TransportRequest,
};

fn key() -> QueryKey {
  QueryKey::from(["events", "e1"])
}

fn setup() -> (
  Arc<CacheStore>,
  Arc<QueryCoordinator>,
  MutationRunner,
  tokio::sync::mpsc::UnboundedReceiver<TransportRequest>,
) {
  let store = Arc::new(CacheStore::new(16));
  let (transport, rx) = ChannelTransport::new();
  let coordinator = Arc::new(QueryCoordinator::new(store.clone(), Arc::new(transport)));
  let runner = MutationRunner::new(store.clone(), coordinator.clone());
  (store, coordinator, runner, rx)
}

// =============================================================================
// Commit and rollback
// =============================================================================

#[tokio::test]
async fn test_successful_mutation_keeps_optimistic_value() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!({"title": "Old"}));

  let committed = runner
    .run(&key(), json!({"title": "New"}), async {
      Ok(json!({"title": "New"}))
    })
    .await
    .unwrap();

  assert_eq!(committed, json!({"title": "New"}));
  assert_eq!(store.get(&key()), Some(json!({"title": "New"})));
  assert_eq!(store.state(&key()), Some(EntryState::Stale));
}

#[tokio::test]
async fn test_failed_mutation_rolls_back() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!({"title": "Old"}));

  let err = runner
    .run(&key(), json!({"title": "New"}), async {
      Err(TransportError::new("conflict"))
    })
    .await
    .unwrap_err();

  assert_eq!(
    err,
    MutationError::Transport(TransportError::new("conflict"))
  );
  assert_eq!(store.get(&key()), Some(json!({"title": "Old"})));
  assert_eq!(store.state(&key()), Some(EntryState::Stale));
}

#[tokio::test]
async fn test_failed_mutation_on_absent_key_restores_absence() {
  let (store, _coordinator, runner, _rx) = setup();

  let result = runner
    .run(&key(), json!("optimistic"), async {
      Err(TransportError::new("boom"))
    })
    .await;

  assert!(result.is_err());
  assert_eq!(store.get(&key()), None);
}

// =============================================================================
// Optimistic visibility
// =============================================================================

#[tokio::test]
async fn test_optimistic_value_visible_before_remote_resolves() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!({"title": "Old"}));

  let probe = store.clone();
  let result = runner
    .run(&key(), json!({"title": "New"}), async move {
      // Still awaiting the remote write: the cache already shows the
      // optimistic value.
      assert_eq!(probe.get(&key()), Some(json!({"title": "New"})));
      Err(TransportError::new("conflict"))
    })
    .await;

  assert!(result.is_err());
  assert_eq!(store.get(&key()), Some(json!({"title": "Old"})));
}

#[tokio::test]
async fn test_watcher_registered_before_mutation_sees_optimistic_update() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!({"title": "Old"}));

  let mut watcher = store.watch(&key());
  runner
    .run(&key(), json!({"title": "New"}), async {
      Ok(json!({"title": "New"}))
    })
    .await
    .unwrap();

  let first = watcher.next().await.unwrap();
  assert_eq!(first.value, Some(json!({"title": "New"})));
  assert_eq!(first.state, EntryState::Fresh);

  let second = watcher.next().await.unwrap();
  assert_eq!(second.state, EntryState::Stale);
}

// =============================================================================
// Settle-always
// =============================================================================

#[tokio::test]
async fn test_settle_marks_stale_exactly_once_on_failure() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!("a"));
  let mut watcher = store.watch(&key());

  let _ = runner
    .run(&key(), json!("b"), async { Err(TransportError::new("x")) })
    .await;

  // optimistic set, rollback set, then exactly one stale transition
  let mut stale_count = 0;
  while let Some(snapshot) = watcher.try_next() {
    if snapshot.state == EntryState::Stale {
      stale_count += 1;
    }
  }
  assert_eq!(stale_count, 1);
}

#[tokio::test]
async fn test_abandoned_mutation_still_settles() {
  let (store, _coordinator, runner, _rx) = setup();
  let k = key();
  store.set(&k, json!({"title": "Old"}));

  let mut attempt = Box::pin(runner.run(&k, json!({"title": "New"}), std::future::pending()));

  // Let the attempt reach the remote call, then abandon it.
  let poll = tokio::time::timeout(Duration::from_millis(20), &mut attempt).await;
  assert!(poll.is_err());
  drop(attempt);

  // The optimistic value stands (no failure was observed) but the entry is
  // marked stale so a refetch converges it.
  assert_eq!(store.get(&key()), Some(json!({"title": "New"})));
  assert_eq!(store.state(&key()), Some(EntryState::Stale));
}

// =============================================================================
// Sequential and overlapping mutations
// =============================================================================

#[tokio::test]
async fn test_sequential_mutations_never_corrupt_entry() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!("v0"));

  runner
    .run(&key(), json!("v1"), async { Ok(json!("v1")) })
    .await
    .unwrap();
  assert_eq!(store.get(&key()), Some(json!("v1")));

  let _ = runner
    .run(&key(), json!("v2"), async { Err(TransportError::new("x")) })
    .await;

  // Second attempt failed: its snapshot (v1) is restored.
  assert_eq!(store.get(&key()), Some(json!("v1")));
  assert_eq!(store.state(&key()), Some(EntryState::Stale));
}

#[tokio::test]
async fn test_rollback_skipped_when_later_write_owns_entry() {
  let (store, _coordinator, runner, _rx) = setup();
  store.set(&key(), json!("server"));

  let racing_writer = store.clone();
  let result = runner
    .run(&key(), json!("first-optimistic"), async move {
      // A second mutation's optimistic write lands while the first is
      // awaiting its remote call.
      racing_writer.set(&key(), json!("second-optimistic"));
      Err(TransportError::new("conflict"))
    })
    .await;

  assert!(result.is_err());
  // The first mutation's stale snapshot must not clobber the later write.
  assert_eq!(store.get(&key()), Some(json!("second-optimistic")));
}

// =============================================================================
// In-flight read interaction
// =============================================================================

#[tokio::test]
async fn test_mutation_cancels_in_flight_read() {
  let (store, coordinator, runner, mut rx) = setup();
  store.set(&key(), json!({"title": "Old"}));

  let read = tokio::spawn({
    let coordinator = coordinator.clone();
    async move { coordinator.refetch(&key()).await }
  });
  let request = rx.recv().await.unwrap();
  assert!(coordinator.in_flight(&key()));

  runner
    .run(&key(), json!({"title": "New"}), async {
      Ok(json!({"title": "New"}))
    })
    .await
    .unwrap();

  // The read was cancelled by the mutation; its late result is discarded
  // rather than clobbering the optimistic value.
  match request {
    TransportRequest::Fetch { reply, .. } => {
      let _ = reply.send(Ok(json!({"title": "Old"})));
    }
    other => panic!("expected fetch request, got {:?}", other),
  }
  assert!(read.await.unwrap().is_err());
  assert_eq!(store.get(&key()), Some(json!({"title": "New"})));
}
