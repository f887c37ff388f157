use async_trait::async_trait;

use crate::Result;

/// The subset of a networked key/value store's command surface this
/// crate family needs: strings, lists, sorted sets, incremental scan,
/// a conditional set-with-expiry, and an atomic compare-and-delete.
/// Implemented once against a real backing store (`RedisBackend`) and
/// once in memory for tests (`regstore-testkit::FakeBackend`), so the
/// stores above never talk to a wire protocol directly.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Unconditional write, returning the previous value if any (GETSET).
    async fn getset(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns whether a key existed and was removed.
    async fn del(&self, key: &[u8]) -> Result<bool>;

    /// `SET key value NX PX ttl_ms`: succeeds only if `key` was absent.
    async fn set_nx_px(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<bool>;

    /// Atomically deletes `key` iff its current value equals `expected`.
    async fn cas_del(&self, key: &[u8], expected: &[u8]) -> Result<bool>;

    async fn lpush(&self, key: &[u8], value: &[u8]) -> Result<()>;

    async fn lrange(&self, key: &[u8], start: isize, stop: isize) -> Result<Vec<Vec<u8>>>;

    /// Removes every occurrence of `value` from the list at `key`.
    async fn lrem(&self, key: &[u8], value: &[u8]) -> Result<i64>;

    async fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> Result<()>;

    async fn zrem(&self, key: &[u8], member: &[u8]) -> Result<()>;

    /// Members scored `<= max_score`, ascending, capped at `limit`.
    async fn zrangebyscore_limit(
        &self,
        key: &[u8],
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>>;

    async fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;

    /// One page of an incremental SCAN restricted to keys with the given
    /// byte prefix. `cursor == 0` both starts and (when returned) ends
    /// the scan, per the backing store's own cursor convention.
    async fn scan_page(
        &self,
        cursor: u64,
        prefix: &[u8],
        count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)>;

    /// Cardinality of the sorted set at `key` (used for diagnostics).
    async fn zcard(&self, key: &[u8]) -> Result<u64>;
}
