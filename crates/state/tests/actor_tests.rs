//! Behavioral tests for the state actor: index consistency, the one-shot
//! claim guarantee under concurrency, and persistence semantics.

use deaddrop_state::{
    JsonFileStore, MemoryStore, OpError, RelayLimits, ReserveRequest, StateActor, StateStore,
    TokenStatus,
};
use std::sync::Arc;

fn limits() -> RelayLimits {
    RelayLimits {
        api_key: None,
        rate_limit_sec: 0,
        max_pending: 0,
        ttl_sec: 0,
    }
}

fn reserve_req(name: &str) -> ReserveRequest {
    ReserveRequest {
        ip: "10.0.0.1".to_string(),
        api_key: None,
        filename: name.to_string(),
        size: 4,
        content_type: "application/octet-stream".to_string(),
    }
}

async fn actor_with(store: Arc<dyn StateStore>, limits: RelayLimits) -> StateActor {
    StateActor::load(store, limits).await.expect("actor load")
}

/// Every index must agree after any sequence of operations: tokens <-> queue,
/// by_name points at live non-claimed tokens, one binding per filename.
fn assert_indexes_consistent(state: &deaddrop_state::RelayState) {
    assert_eq!(state.tokens.len(), state.queue.len());
    for t in &state.queue {
        assert!(state.tokens.contains_key(t), "queued token missing: {t}");
    }
    let mut seen = std::collections::HashSet::new();
    for t in &state.queue {
        assert!(seen.insert(t.clone()), "token appears twice in queue: {t}");
    }
    for (name, t) in &state.by_name {
        let meta = state.tokens.get(t).expect("by_name points at live token");
        assert_eq!(&meta.filename, name);
        assert_ne!(meta.status, TokenStatus::Claimed);
    }
    let mut live_names = std::collections::HashSet::new();
    for meta in state.tokens.values() {
        if meta.status != TokenStatus::Claimed {
            assert!(
                live_names.insert(meta.filename.clone()),
                "two live tokens share filename {}",
                meta.filename
            );
        }
    }
}

async fn snapshot(store: &MemoryStore) -> deaddrop_state::RelayState {
    store.load().await.unwrap().unwrap_or_default()
}

#[tokio::test]
async fn indexes_stay_consistent_through_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_with(store.clone(), limits()).await;

    let a = actor.reserve(reserve_req("a.txt")).await.unwrap();
    assert_indexes_consistent(&snapshot(&store).await);

    actor.commit(&a.token).await.unwrap();
    assert_indexes_consistent(&snapshot(&store).await);

    let b = actor.reserve(reserve_req("b.txt")).await.unwrap();
    actor.commit(&b.token).await.unwrap();
    assert_indexes_consistent(&snapshot(&store).await);

    actor.claim(&a.token, "a.txt").await.unwrap();
    assert_indexes_consistent(&snapshot(&store).await);

    actor.finalize(&a.token).await.unwrap();
    actor.abort(&b.token).await.unwrap();
    let final_state = snapshot(&store).await;
    assert_indexes_consistent(&final_state);
    assert!(final_state.tokens.is_empty());
}

#[tokio::test]
async fn concurrent_claims_succeed_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let actor = Arc::new(actor_with(store.clone(), limits()).await);

    let granted = actor.reserve(reserve_req("race.bin")).await.unwrap();
    actor.commit(&granted.token).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let actor = actor.clone();
        let token = granted.token.clone();
        tasks.push(tokio::spawn(async move {
            actor.claim(&token, "race.bin").await
        }));
    }

    let mut successes = 0;
    let mut misses = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(grant) => {
                successes += 1;
                assert_eq!(grant.object_key, granted.object_key);
            }
            Err(OpError::NotFound) => misses += 1,
            Err(other) => panic!("unexpected claim error: {other}"),
        }
    }
    assert_eq!(successes, 1, "exactly one claim must win");
    assert_eq!(misses, 15);
}

#[tokio::test]
async fn overwrites_keep_single_binding_and_retire_objects() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_with(store.clone(), limits()).await;

    let mut object_keys = Vec::new();
    let mut retired_keys = Vec::new();
    for _ in 0..5 {
        let grant = actor.reserve(reserve_req("same-name.dat")).await.unwrap();
        object_keys.push(grant.object_key.clone());
        retired_keys.extend(grant.retired);
        actor.commit(&grant.token).await.unwrap();
        assert_indexes_consistent(&snapshot(&store).await);
    }

    // Every object key except the live one was handed back for deletion.
    let live = object_keys.last().unwrap();
    for key in &object_keys[..object_keys.len() - 1] {
        assert!(retired_keys.contains(key), "missing retired key {key}");
    }
    assert!(!retired_keys.contains(live));

    let state = snapshot(&store).await;
    assert_eq!(state.tokens.len(), 1);
}

#[tokio::test]
async fn cap_keeps_most_recent_ready_tokens() {
    let store = Arc::new(MemoryStore::new());
    let lim = RelayLimits {
        max_pending: 2,
        ..limits()
    };
    let actor = actor_with(store.clone(), lim).await;

    let f1 = actor.reserve(reserve_req("f1")).await.unwrap();
    let f2 = actor.reserve(reserve_req("f2")).await.unwrap();
    let f3 = actor.reserve(reserve_req("f3")).await.unwrap();
    actor.commit(&f1.token).await.unwrap();
    actor.commit(&f2.token).await.unwrap();
    let retired = actor.commit(&f3.token).await.unwrap();
    assert_eq!(retired, vec![f1.object_key.clone()]);

    // f1 is gone; f2 and f3 each download exactly once.
    assert_eq!(
        actor.claim(&f1.token, "f1").await.unwrap_err(),
        OpError::NotFound
    );
    assert!(actor.claim(&f2.token, "f2").await.is_ok());
    assert!(actor.claim(&f3.token, "f3").await.is_ok());
    assert_eq!(
        actor.claim(&f3.token, "f3").await.unwrap_err(),
        OpError::NotFound
    );
    assert_indexes_consistent(&snapshot(&store).await);
}

#[tokio::test]
async fn rate_limit_clock_survives_failed_reserve() {
    let store = Arc::new(MemoryStore::new());
    let lim = RelayLimits {
        rate_limit_sec: 10,
        ..limits()
    };
    let actor = actor_with(store.clone(), lim).await;

    // The filename sanitizes to nothing; the reserve 404s after the rate
    // check passed.
    let mut bad = reserve_req("..");
    bad.ip = "1.2.3.4".to_string();
    assert_eq!(actor.reserve(bad).await.unwrap_err(), OpError::NotFound);

    // The admission clock was committed anyway.
    let state = snapshot(&store).await;
    assert!(state.last_upload.contains_key("1.2.3.4"));

    // So a throwaway 404ing reserve cannot launder the next real upload
    // past the limiter.
    let mut real = reserve_req("real.txt");
    real.ip = "1.2.3.4".to_string();
    assert_eq!(
        actor.reserve(real).await.unwrap_err(),
        OpError::TooManyRequests
    );
}

#[tokio::test]
async fn failed_persistence_rolls_back() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_with(store.clone(), limits()).await;

    let grant = actor.reserve(reserve_req("keep.txt")).await.unwrap();
    actor.commit(&grant.token).await.unwrap();

    store
        .fail_saves
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let err = actor.claim(&grant.token, "keep.txt").await.unwrap_err();
    assert!(matches!(err, OpError::Internal(_)));
    store
        .fail_saves
        .store(false, std::sync::atomic::Ordering::Relaxed);

    // The failed claim left no trace: the token is still claimable.
    let grant2 = actor.claim(&grant.token, "keep.txt").await.unwrap();
    assert_eq!(grant2.object_key, grant.object_key);
}

#[tokio::test]
async fn hc_count_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let first = actor_with(Arc::new(JsonFileStore::new(&path)), limits()).await;
    let snap = first.hc().await.unwrap();
    assert_eq!(snap.hc_count, 1);
    let snap = first.hc().await.unwrap();
    assert_eq!(snap.hc_count, 2);
    drop(first);

    let second = actor_with(Arc::new(JsonFileStore::new(&path)), limits()).await;
    let snap = second.hc().await.unwrap();
    assert_eq!(snap.hc_count, 3);
}

#[tokio::test]
async fn ready_tokens_survive_restart_and_stay_one_shot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let first = actor_with(Arc::new(JsonFileStore::new(&path)), limits()).await;
    let grant = first.reserve(reserve_req("durable.bin")).await.unwrap();
    first.commit(&grant.token).await.unwrap();
    drop(first);

    let second = actor_with(Arc::new(JsonFileStore::new(&path)), limits()).await;
    assert!(second.claim(&grant.token, "durable.bin").await.is_ok());
    assert_eq!(
        second.claim(&grant.token, "durable.bin").await.unwrap_err(),
        OpError::NotFound
    );
}

#[tokio::test]
async fn scheduled_cleanup_returns_expired_object_keys() {
    let store = Arc::new(MemoryStore::new());
    let lim = RelayLimits {
        ttl_sec: 1,
        ..limits()
    };
    let actor = actor_with(store.clone(), lim).await;

    let grant = actor.reserve(reserve_req("fleeting.txt")).await.unwrap();
    actor.commit(&grant.token).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let retired = actor.cleanup().await.unwrap();
    assert_eq!(retired, vec![grant.object_key]);
    assert!(snapshot(&store).await.tokens.is_empty());
}

#[tokio::test]
async fn abort_and_finalize_are_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_with(store.clone(), limits()).await;

    let grant = actor.reserve(reserve_req("twice.txt")).await.unwrap();
    let first = actor.abort(&grant.token).await.unwrap();
    assert_eq!(first, vec![grant.object_key.clone()]);
    let second = actor.abort(&grant.token).await.unwrap();
    assert!(second.is_empty());
    assert!(actor.finalize(&grant.token).await.unwrap().is_empty());
}
