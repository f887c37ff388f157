//! A cooperative advisory lock keyed by endpoint name, implemented
//! entirely over the backing key/value store so it serializes
//! mutations against one endpoint across every server process, not
//! just within one.
//!
//! Acquisition is `SET key token NX PX ttl`: the TTL is a deadlock
//! backstop, not a lease renewal mechanism, so holders are expected to
//! finish their critical section well inside it. Release is an atomic
//! compare-and-delete so an expired, stolen lock can never be released
//! out from under its new holder.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use regstore_base::{Error, KvBackend, Result};
use tracing::{debug, warn};

/// Tunables for acquisition retry. Mirrors the fields `StoreConfig`
/// forwards into `PeerLock::new`.
#[derive(Clone, Copy, Debug)]
pub struct LockConfig {
    pub ttl: Duration,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub acquire_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(500),
            retry_min_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(50),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// An opaque token proving lock ownership, handed back by `acquire` and
/// required by `release`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken(Vec<u8>);

/// A held lock. Releasing consumes it; dropping it without releasing
/// leaves the lock to expire on its own TTL (a log is emitted so an
/// unreleased guard is visible in the trace).
pub struct LockGuard<'a> {
    lock: &'a PeerLock,
    key: Vec<u8>,
    token: LockToken,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release(&self.key, &self.token).await
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                target: "regstore",
                key = %String::from_utf8_lossy(&self.key),
                "peer lock guard dropped without explicit release; relying on TTL expiry",
            );
        }
    }
}

pub struct PeerLock {
    backend: Arc<dyn KvBackend>,
    config: LockConfig,
}

impl PeerLock {
    pub fn new(backend: Arc<dyn KvBackend>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    /// Blocks (asynchronously) until the lock named `key` is held,
    /// returning a guard that releases it. Fails with
    /// `LockAcquisitionFailed` if `acquire_timeout` elapses first.
    pub async fn acquire(&self, key: &[u8]) -> Result<LockGuard<'_>> {
        let token = LockToken(random_token());
        let deadline = tokio::time::Instant::now() + self.config.acquire_timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let acquired = self
                .backend
                .set_nx_px(key, &token.0, self.config.ttl.as_millis() as u64)
                .await?;
            if acquired {
                debug!(
                    target: "regstore",
                    key = %String::from_utf8_lossy(key),
                    attempts,
                    "peer lock acquired",
                );
                return Ok(LockGuard {
                    lock: self,
                    key: key.to_vec(),
                    token,
                    released: false,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::lock_acquisition_failed(
                    String::from_utf8_lossy(key).into_owned(),
                    attempts,
                ));
            }

            let delay = jittered_delay(self.config.retry_min_delay, self.config.retry_max_delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn release(&self, key: &[u8], token: &LockToken) -> Result<()> {
        let released = self.backend.cas_del(key, &token.0).await?;
        if !released {
            warn!(
                target: "regstore",
                key = %String::from_utf8_lossy(key),
                "peer lock release found a mismatched or absent token (likely expired already)",
            );
        }
        Ok(())
    }
}

fn random_token() -> Vec<u8> {
    let mut bytes = vec![0u8; 16];
    rand::thread_rng().fill(bytes.as_mut_slice());
    bytes
}

fn jittered_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    let extra = rand::thread_rng().gen_range(0..=span);
    min + Duration::from_millis(extra)
}
