use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tracing::debug;

use crate::{backend::KvBackend, Result};

// Deletes `key` iff its current value equals `ARGV[1]`. Implemented as
// a script because the backing store has no native CAS-delete command;
// this is the one place PeerLock relies on server-side atomicity.
const CAS_DEL_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A bounded, lazily-populated connection pool in front of a real
/// Redis (or Redis-protocol-compatible) server. Every method below
/// checks a connection out for the duration of the call and lets
/// `deadpool_redis`'s guard return it to the pool on drop, including
/// on early returns and panics.
pub struct RedisBackend {
    pool: Pool,
    cas_del_script: Script,
}

impl RedisBackend {
    pub fn new(redis_url: impl Into<String>, pool_max_size: usize) -> Result<Self> {
        let mut cfg = Config::from_url(redis_url.into());
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_max_size));
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool, cas_del_script: Script::new(CAS_DEL_SCRIPT) })
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn getset(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.getset::<_, _, Option<Vec<u8>>>(key, value).await?)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn set_nx_px(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let ok: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await?;
        Ok(ok.is_some())
    }

    async fn cas_del(&self, key: &[u8], expected: &[u8]) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = self
            .cas_del_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await?;
        debug!(removed, "peer lock cas-delete");
        Ok(removed > 0)
    }

    async fn lpush(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn lrange(&self, key: &[u8], start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn lrem(&self, key: &[u8], value: &[u8]) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        Ok(conn.lrem(key, 0, value).await?)
    }

    async fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &[u8], member: &[u8]) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zrangebyscore_limit(
        &self,
        key: &[u8],
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        Ok(redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut *conn)
            .await?)
    }

    async fn mget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        Ok(conn.mget(keys).await?)
    }

    async fn scan_page(
        &self,
        cursor: u64,
        prefix: &[u8],
        count: usize,
    ) -> Result<(u64, Vec<Vec<u8>>)> {
        let mut pattern = Vec::with_capacity(prefix.len() + 1);
        pattern.extend_from_slice(prefix);
        pattern.push(b'*');
        let mut conn = self.pool.get().await?;
        let (next, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut *conn)
            .await?;
        Ok((next, keys))
    }

    async fn zcard(&self, key: &[u8]) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        Ok(conn.zcard(key).await?)
    }
}
