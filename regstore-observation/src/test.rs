use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use regstore_base::{Error, KvBackend};
use regstore_codec::{Observation, ObservationContext, ResourcePath};
use regstore_lock::{LockConfig, PeerLock};
use regstore_testkit::FakeBackend;

use crate::ObservationStore;

fn fast_lock(backend: Arc<dyn KvBackend>) -> Arc<PeerLock> {
    Arc::new(PeerLock::new(
        backend,
        LockConfig {
            ttl: Duration::from_millis(200),
            retry_min_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(3),
            acquire_timeout: Duration::from_millis(500),
        },
    ))
}

async fn register(backend: &Arc<dyn KvBackend>, registration_id: &str, endpoint: &str) {
    backend
        .set(&regstore_keys::id_index_key(registration_id), endpoint.as_bytes())
        .await
        .unwrap();
}

fn observation(token: &[u8], registration_id: &str, path: ResourcePath) -> Observation {
    Observation {
        token: token.to_vec(),
        registration_id: registration_id.into(),
        path,
        context: ObservationContext {
            content_format: 11542,
            request_token: vec![1],
            endpoint_context: None,
        },
    }
}

fn path(resource_id: u16) -> ResourcePath {
    ResourcePath { object_id: 3, instance_id: Some(0), resource_id: Some(resource_id) }
}

fn store() -> (Arc<dyn KvBackend>, ObservationStore) {
    let backend: Arc<dyn KvBackend> = Arc::new(FakeBackend::new());
    let lock = fast_lock(backend.clone());
    let store = ObservationStore::new(backend.clone(), lock);
    (backend, store)
}

#[tokio::test]
async fn put_requires_known_registration() {
    let (_backend, store) = store();
    let obs = observation(b"\xAB", "R1", path(1));
    let err = store.put(b"\xAB", obs).await.unwrap_err();
    assert!(matches!(err, Error::NoSuchRegistration { .. }));
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    let obs = observation(b"\xAB", "R1", path(1));
    let prev = store.put(b"\xAB", obs.clone()).await.unwrap();
    assert!(prev.is_none());
    let fetched = store.get(b"\xAB").await.unwrap();
    assert_eq!(fetched, Some(obs));
}

#[tokio::test]
async fn remove_then_get_returns_none() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    let obs = observation(b"\xAB", "R1", path(1));
    store.put(b"\xAB", obs).await.unwrap();
    let removed = store.remove(b"\xAB").await.unwrap();
    assert!(removed.is_some());
    assert_eq!(store.get(b"\xAB").await.unwrap(), None);
}

#[tokio::test]
async fn token_collision_put_overwrites_and_returns_prior() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    register(&backend, "R2", "dev-B").await;
    let first = observation(b"\xAB", "R1", path(1));
    let second = observation(b"\xAB", "R2", path(2));
    store.put(b"\xAB", first.clone()).await.unwrap();
    let prev = store.put(b"\xAB", second.clone()).await.unwrap();
    assert_eq!(prev, Some(first));
    assert_eq!(store.get(b"\xAB").await.unwrap(), Some(second));
}

#[tokio::test]
async fn token_collision_put_if_absent_preserves_original() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    register(&backend, "R2", "dev-B").await;
    let first = observation(b"\xAB", "R1", path(1));
    let second = observation(b"\xAB", "R2", path(2));
    store.put_if_absent(b"\xAB", first.clone()).await.unwrap();
    let existing = store.put_if_absent(b"\xAB", second).await.unwrap();
    assert_eq!(existing, Some(first.clone()));
    assert_eq!(store.get(b"\xAB").await.unwrap(), Some(first));
}

#[tokio::test]
async fn add_observation_evicts_same_path_different_token() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    let old = observation(b"\xAB", "R1", path(1));
    store.put(b"\xAB", old.clone()).await.unwrap();

    let new_obs = observation(b"\xCD", "R1", path(1));
    store.put(b"\xCD", new_obs.clone()).await.unwrap();

    let evicted = store.add_observation("R1", &new_obs).await.unwrap();
    assert_eq!(evicted, vec![old]);
    assert_eq!(store.get(b"\xAB").await.unwrap(), None);
    assert_eq!(store.get(b"\xCD").await.unwrap(), Some(new_obs));
}

#[tokio::test]
#[cfg_attr(debug_assertions, should_panic)]
async fn add_observation_without_a_prior_put_is_rejected() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    let obs = observation(b"\xAB", "R1", path(1));

    let result = store.add_observation("R1", &obs).await;
    if !cfg!(debug_assertions) {
        assert!(matches!(result, Err(Error::NoSuchRegistration { .. })));
    }
}

#[tokio::test]
async fn remove_observations_bulk_deletes_all_of_a_registration() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    store.put(b"\xAB", observation(b"\xAB", "R1", path(1))).await.unwrap();
    store.put(b"\xCD", observation(b"\xCD", "R1", path(2))).await.unwrap();

    let removed = store.remove_observations("R1").await.unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(store.get(b"\xAB").await.unwrap(), None);
    assert_eq!(store.get(b"\xCD").await.unwrap(), None);
    assert_eq!(store.get_observations("R1").await.unwrap(), Vec::new());
}

#[tokio::test]
async fn remove_observation_guards_against_token_reuse_across_registrations() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    register(&backend, "R2", "dev-B").await;
    store.put(b"\xAB", observation(b"\xAB", "R1", path(1))).await.unwrap();

    // R2 did not create this observation; removal under R2 must be a no-op.
    let removed = store.remove_observation("R2", b"\xAB").await.unwrap();
    assert!(removed.is_none());
    assert!(store.get(b"\xAB").await.unwrap().is_some());
}

#[tokio::test]
async fn set_context_updates_stored_observation() {
    let (backend, store) = store();
    register(&backend, "R1", "dev-A").await;
    store.put(b"\xAB", observation(b"\xAB", "R1", path(1))).await.unwrap();

    store.set_context(b"\xAB", Some("new-ctx".into())).await.unwrap();
    let obs = store.get(b"\xAB").await.unwrap().unwrap();
    assert_eq!(obs.context.endpoint_context, Some("new-ctx".into()));
}

#[tokio::test]
async fn set_context_on_unknown_token_is_a_no_op() {
    let (_backend, store) = store();
    store.set_context(b"\xFF", Some("ctx".into())).await.unwrap();
}

proptest! {
    // P6: put followed by get returns the same observation; remove
    // followed by get returns null.
    #[test]
    fn put_get_remove_round_trip(
        token_byte in 0u8..=255,
        content_format in any::<u16>(),
        resource_id in 0u16..5,
    ) {
        tokio_test::block_on(async {
            let (backend, store) = store();
            register(&backend, "R1", "dev-A").await;
            let token = vec![token_byte];
            let obs = Observation {
                token: token.clone(),
                registration_id: "R1".into(),
                path: path(resource_id),
                context: ObservationContext {
                    content_format,
                    request_token: vec![token_byte],
                    endpoint_context: None,
                },
            };

            store.put(&token, obs.clone()).await.unwrap();
            assert_eq!(store.get(&token).await.unwrap(), Some(obs));

            let removed = store.remove(&token).await.unwrap();
            assert!(removed.is_some());
            assert_eq!(store.get(&token).await.unwrap(), None);
        });
    }

    // P4: for any (registration, path), at most one observation survives
    // once every insertion goes through `add_observation`'s eviction.
    #[test]
    fn add_observation_never_leaves_two_observations_on_the_same_path(
        resource_ids in proptest::collection::vec(0u16..3, 0..12),
    ) {
        tokio_test::block_on(async {
            let (backend, store) = store();
            register(&backend, "R1", "dev-A").await;

            for (i, resource_id) in resource_ids.into_iter().enumerate() {
                let token = vec![i as u8];
                let obs = observation(&token, "R1", path(resource_id));
                store.put(&token, obs.clone()).await.unwrap();
                store.add_observation("R1", &obs).await.unwrap();
            }

            let observations = store.get_observations("R1").await.unwrap();
            let mut seen_paths = HashSet::new();
            for obs in &observations {
                let key = (obs.path.object_id, obs.path.instance_id, obs.path.resource_id);
                assert!(seen_paths.insert(key), "more than one observation stored for the same path");
            }
        });
    }
}
