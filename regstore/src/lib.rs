//! The facade this crate family is built to hide behind: one handle
//! that owns the connection pool and the sweeper's lifecycle. Building
//! a `RegStore` constructs both; calling `shutdown` (or dropping it)
//! tears the sweeper down, deterministically if you await `shutdown`.

use std::sync::Arc;
use std::time::Duration;

pub use regstore_base::{Error, KvBackend, RedisBackend, Result};
pub use regstore_codec::{
    LinkAttributes, Millis, ObjectLink, Observation, ObservationContext, Registration, ResourcePath,
};
pub use regstore_lock::{LockConfig, LockGuard, PeerLock};
pub use regstore_observation::ObservationStore;
pub use regstore_registration::{
    Deregistration, RegistrationStore, RegistrationUpdate, UpdatedRegistration,
};
pub use regstore_sweeper::{ExpirationListener, Sweeper, SweeperConfig};

/// Every tunable this store family exposes. Defaults match the
/// documented values; every field is overridable via a builder method.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    redis_url: String,
    clean_period: Duration,
    clean_limit: usize,
    grace_period_secs: u32,
    lock_ttl: Duration,
    lock_retry_min_delay: Duration,
    lock_retry_max_delay: Duration,
    lock_acquire_timeout: Duration,
    pool_max_size: usize,
    pool_idle_timeout: Duration,
    scheduler_thread_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            clean_period: Duration::from_secs(60),
            clean_limit: 500,
            grace_period_secs: 0,
            lock_ttl: Duration::from_millis(500),
            lock_retry_min_delay: Duration::from_millis(10),
            lock_retry_max_delay: Duration::from_millis(50),
            lock_acquire_timeout: Duration::from_secs(5),
            pool_max_size: 16,
            pool_idle_timeout: Duration::from_secs(300),
            scheduler_thread_name: "regstore-sweeper".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self { redis_url: redis_url.into(), ..Self::default() }
    }

    pub fn with_clean_period(mut self, clean_period: Duration) -> Self {
        self.clean_period = clean_period;
        self
    }

    pub fn with_clean_limit(mut self, clean_limit: usize) -> Self {
        self.clean_limit = clean_limit;
        self
    }

    pub fn with_grace_period_secs(mut self, grace_period_secs: u32) -> Self {
        self.grace_period_secs = grace_period_secs;
        self
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn with_lock_retry_delays(mut self, min: Duration, max: Duration) -> Self {
        self.lock_retry_min_delay = min;
        self.lock_retry_max_delay = max;
        self
    }

    pub fn with_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout = timeout;
        self
    }

    pub fn with_pool_max_size(mut self, pool_max_size: usize) -> Self {
        self.pool_max_size = pool_max_size;
        self
    }

    pub fn with_pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn with_scheduler_thread_name(mut self, name: impl Into<String>) -> Self {
        self.scheduler_thread_name = name.into();
        self
    }

    fn lock_config(&self) -> LockConfig {
        LockConfig {
            ttl: self.lock_ttl,
            retry_min_delay: self.lock_retry_min_delay,
            retry_max_delay: self.lock_retry_max_delay,
            acquire_timeout: self.lock_acquire_timeout,
        }
    }

    fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            clean_period: self.clean_period,
            clean_limit: self.clean_limit,
            grace_period_secs: self.grace_period_secs,
        }
    }
}

/// Owns everything this crate family needs to run: the connection
/// pool (via the stores' shared backend handle) and the sweeper.
/// Constructing it starts the sweeper immediately; the idle-connection
/// pool underneath is lazy and only grows on demand.
pub struct RegStore {
    registrations: Arc<RegistrationStore>,
    observations: Arc<ObservationStore>,
    sweeper: Sweeper,
}

impl RegStore {
    pub fn connect(config: StoreConfig) -> Result<Self> {
        let backend: Arc<dyn KvBackend> =
            Arc::new(RedisBackend::new(config.redis_url.clone(), config.pool_max_size)?);
        Ok(Self::from_backend(backend, config))
    }

    /// Builds a `RegStore` over an already-constructed backend. The
    /// public entry point for production use is `connect`; this is
    /// exposed so tests can swap in an in-memory backend double.
    pub fn from_backend(backend: Arc<dyn KvBackend>, config: StoreConfig) -> Self {
        let lock = Arc::new(PeerLock::new(backend.clone(), config.lock_config()));
        let observations = Arc::new(ObservationStore::new(backend.clone(), lock.clone()));
        let registrations = Arc::new(RegistrationStore::new(
            backend,
            lock,
            observations.clone(),
            config.grace_period_secs,
        ));
        let sweeper = Sweeper::new(registrations.clone(), config.sweeper_config());
        sweeper.start();

        Self { registrations, observations, sweeper }
    }

    pub fn registrations(&self) -> &RegistrationStore {
        &self.registrations
    }

    pub fn observations(&self) -> &ObservationStore {
        &self.observations
    }

    pub fn set_expiration_listener(&self, listener: Arc<dyn ExpirationListener>) {
        self.sweeper.set_listener(listener);
    }

    /// Stops the sweeper, waiting up to 5 seconds for its in-flight
    /// tick. Prefer this over letting `RegStore` simply drop when a
    /// deterministic shutdown matters.
    pub async fn shutdown(self) {
        self.sweeper.stop().await;
    }
}
