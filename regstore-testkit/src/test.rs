use crate::FakeBackend;
use regstore_base::KvBackend;

#[tokio::test]
async fn set_nx_px_refuses_when_key_is_live() {
    let backend = FakeBackend::new();
    assert!(backend.set_nx_px(b"k", b"v1", 10_000).await.unwrap());
    assert!(!backend.set_nx_px(b"k", b"v2", 10_000).await.unwrap());
    assert_eq!(backend.get(b"k").await.unwrap(), Some(b"v1".to_vec()));
}

#[tokio::test]
async fn set_nx_px_expires_lazily() {
    let backend = FakeBackend::new();
    assert!(backend.set_nx_px(b"k", b"v1", 1).await.unwrap());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(backend.get(b"k").await.unwrap(), None);
    assert!(backend.set_nx_px(b"k", b"v2", 10_000).await.unwrap());
}

#[tokio::test]
async fn cas_del_only_removes_on_match() {
    let backend = FakeBackend::new();
    backend.set(b"k", b"token-a").await.unwrap();
    assert!(!backend.cas_del(b"k", b"token-b").await.unwrap());
    assert!(backend.cas_del(b"k", b"token-a").await.unwrap());
    assert_eq!(backend.get(b"k").await.unwrap(), None);
}

#[tokio::test]
async fn zrangebyscore_limit_is_ascending_and_capped() {
    let backend = FakeBackend::new();
    backend.zadd(b"z", b"c", 3.0).await.unwrap();
    backend.zadd(b"z", b"a", 1.0).await.unwrap();
    backend.zadd(b"z", b"b", 2.0).await.unwrap();
    let members = backend.zrangebyscore_limit(b"z", 2.0, 10).await.unwrap();
    assert_eq!(members, vec![b"a".to_vec(), b"b".to_vec()]);
    let capped = backend.zrangebyscore_limit(b"z", 10.0, 1).await.unwrap();
    assert_eq!(capped, vec![b"a".to_vec()]);
}

#[tokio::test]
async fn lrem_removes_every_occurrence() {
    let backend = FakeBackend::new();
    backend.lpush(b"l", b"x").await.unwrap();
    backend.lpush(b"l", b"y").await.unwrap();
    backend.lpush(b"l", b"x").await.unwrap();
    let removed = backend.lrem(b"l", b"x").await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(backend.lrange(b"l", 0, -1).await.unwrap(), vec![b"y".to_vec()]);
}

#[tokio::test]
async fn scan_page_filters_by_prefix() {
    let backend = FakeBackend::new();
    backend.set(b"REG:EP:a", b"1").await.unwrap();
    backend.set(b"REG:EP:b", b"2").await.unwrap();
    backend.set(b"OTHER:x", b"3").await.unwrap();
    let (cursor, keys) = backend.scan_page(0, b"REG:EP:", 100).await.unwrap();
    assert_eq!(cursor, 0);
    let mut keys = keys;
    keys.sort();
    assert_eq!(keys, vec![b"REG:EP:a".to_vec(), b"REG:EP:b".to_vec()]);
}
