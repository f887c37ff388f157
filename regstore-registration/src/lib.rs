//! CRUD over `Registration` records with three secondary indexes: by
//! registration-id, by peer socket address, and the expiration
//! priority queue the sweeper drains. Per-endpoint mutation is
//! serialized by `PeerLock`; reads never take it, observing either the
//! pre- or post-state of a write but never a torn record, since every
//! write replaces a whole serialized blob atomically.

use std::net::SocketAddr;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use regstore_base::{KvBackend, Result};
use regstore_codec::{decode, encode, LinkAttributes, Millis, Registration};
use regstore_lock::PeerLock;
use regstore_observation::ObservationStore;
use tracing::{debug, warn};

/// A removed registration together with the observations that were
/// removed alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Deregistration {
    pub registration: Registration,
    pub removed_observations: Vec<regstore_codec::Observation>,
}

/// Prior and new state of a registration after `update_registration`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedRegistration {
    pub prior: Registration,
    pub updated: Registration,
}

/// The mutable subset of a registration `update_registration` may
/// change. `None` fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct RegistrationUpdate {
    pub registration_id: String,
    pub address: Option<SocketAddr>,
    pub lifetime_secs: Option<u32>,
    pub last_update: Option<Millis>,
    pub attributes: Option<LinkAttributes>,
}

const SCAN_PAGE_SIZE: usize = 100;

pub struct RegistrationStore {
    backend: Arc<dyn KvBackend>,
    lock: Arc<PeerLock>,
    observations: Arc<ObservationStore>,
    grace_period_secs: u32,
}

impl RegistrationStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        lock: Arc<PeerLock>,
        observations: Arc<ObservationStore>,
        grace_period_secs: u32,
    ) -> Self {
        Self { backend, lock, observations, grace_period_secs }
    }

    async fn load(&self, endpoint: &str) -> Result<Option<Registration>> {
        match self.backend.get(&regstore_keys::primary_key(endpoint)).await? {
            Some(bytes) => Ok(Some(decode("registration", &bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert_expiration(&self, registration: &Registration) -> Result<()> {
        self.backend
            .zadd(
                regstore_keys::expiration_queue_key(),
                registration.endpoint.as_bytes(),
                registration.expiration_timestamp(self.grace_period_secs) as f64,
            )
            .await
    }

    async fn remove_expiration(&self, endpoint: &str) -> Result<()> {
        self.backend.zrem(regstore_keys::expiration_queue_key(), endpoint.as_bytes()).await
    }

    /// Removes the address index entry for `addr` iff it still points
    /// at `endpoint` — leaves it alone when a newer `add_registration`
    /// on a different endpoint has already taken the binding.
    async fn remove_address_index_if_owned(&self, addr: &SocketAddr, endpoint: &str) -> Result<()> {
        let key = regstore_keys::addr_index_key(addr);
        if let Some(bytes) = self.backend.get(&key).await? {
            if bytes == endpoint.as_bytes() {
                self.backend.del(&key).await?;
            }
        }
        Ok(())
    }

    /// Replaces whatever registration currently occupies `new.endpoint`,
    /// returning the prior registration and any observations it owned.
    /// Acquires `PeerLock(new.endpoint)` for the duration.
    pub async fn add_registration(&self, new: Registration) -> Result<Option<Deregistration>> {
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&new.endpoint)).await?;
        let encoded = encode("registration", &new)?;
        let prior_bytes = self
            .backend
            .getset(&regstore_keys::primary_key(&new.endpoint), &encoded)
            .await?;

        self.backend
            .set(&regstore_keys::id_index_key(&new.id), new.endpoint.as_bytes())
            .await?;
        self.backend
            .set(&regstore_keys::addr_index_key(&new.address), new.endpoint.as_bytes())
            .await?;
        self.upsert_expiration(&new).await?;

        let Some(prior_bytes) = prior_bytes else {
            debug!(target: "regstore", endpoint = %new.endpoint, "registration added");
            return Ok(None);
        };
        let prior: Registration = decode("registration", &prior_bytes)?;

        if prior.id != new.id {
            self.backend.del(&regstore_keys::id_index_key(&prior.id)).await?;
        }
        if prior.address != new.address {
            self.remove_address_index_if_owned(&prior.address, &new.endpoint).await?;
        }
        let removed_observations =
            self.observations.remove_observations_locked(&prior.id).await?;

        debug!(
            target: "regstore",
            endpoint = %new.endpoint,
            prior_id = %prior.id,
            "registration replaced prior occupant",
        );
        Ok(Some(Deregistration { registration: prior, removed_observations }))
    }

    pub async fn update_registration(
        &self,
        update: RegistrationUpdate,
    ) -> Result<Option<UpdatedRegistration>> {
        let Some(endpoint) = self.resolve_endpoint(&update.registration_id).await? else {
            return Ok(None);
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;
        let Some(prior) = self.load(&endpoint).await? else {
            return Ok(None);
        };

        let mut next = prior.clone();
        if let Some(address) = update.address {
            next.address = address;
        }
        if let Some(lifetime_secs) = update.lifetime_secs {
            next.lifetime_secs = lifetime_secs;
        }
        if let Some(last_update) = update.last_update {
            next.last_update = last_update;
        }
        if let Some(attributes) = update.attributes {
            next.attributes = attributes;
        }

        let encoded = encode("registration", &next)?;
        self.backend.set(&regstore_keys::primary_key(&endpoint), &encoded).await?;
        self.upsert_expiration(&next).await?;

        if prior.address != next.address {
            self.backend
                .set(&regstore_keys::addr_index_key(&next.address), endpoint.as_bytes())
                .await?;
            self.remove_address_index_if_owned(&prior.address, &endpoint).await?;
        }

        Ok(Some(UpdatedRegistration { prior, updated: next }))
    }

    async fn resolve_endpoint(&self, registration_id: &str) -> Result<Option<String>> {
        let bytes = self
            .backend
            .get(&regstore_keys::id_index_key(registration_id))
            .await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub async fn get_registration(&self, registration_id: &str) -> Result<Option<Registration>> {
        let Some(endpoint) = self.resolve_endpoint(registration_id).await? else {
            return Ok(None);
        };
        self.load(&endpoint).await
    }

    pub async fn get_registration_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<Option<Registration>> {
        self.load(endpoint).await
    }

    pub async fn get_registration_by_address(
        &self,
        addr: &SocketAddr,
    ) -> Result<Option<Registration>> {
        let Some(bytes) = self.backend.get(&regstore_keys::addr_index_key(addr)).await? else {
            return Ok(None);
        };
        let endpoint = String::from_utf8_lossy(&bytes).into_owned();
        self.load(&endpoint).await
    }

    /// A lazy, non-restartable sequence over every primary-keyspace
    /// record, paged through the backing store's incremental scan
    /// cursor and resolved in batches via multi-get. Tolerant of keys
    /// vanishing mid-scan (a stale key simply yields no record that
    /// page); never fails for that reason alone.
    pub fn get_all_registrations(&self) -> impl Stream<Item = Result<Registration>> + '_ {
        try_stream! {
            let mut cursor = 0u64;
            loop {
                let (next_cursor, keys) = self
                    .backend
                    .scan_page(cursor, regstore_keys::primary_key_prefix(), SCAN_PAGE_SIZE)
                    .await?;
                if !keys.is_empty() {
                    let values = self.backend.mget(&keys).await?;
                    for value in values.into_iter().flatten() {
                        match decode::<Registration>("registration", &value) {
                            Ok(registration) => yield registration,
                            Err(err) => {
                                warn!(target: "regstore", ?err, "skipping malformed registration row during scan");
                            }
                        }
                    }
                }
                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
        }
    }

    /// Unconditional removal. Returns `None` if `registration_id` was
    /// already gone.
    pub async fn remove_registration(
        &self,
        registration_id: &str,
    ) -> Result<Option<Deregistration>> {
        self.remove_registration_inner(registration_id, false).await
    }

    /// Sweeper variant: removes only if the registration is no longer
    /// alive after lock acquisition, guarding against a race with a
    /// concurrent `update_registration` that refreshed it.
    pub async fn remove_registration_if_expired(
        &self,
        registration_id: &str,
    ) -> Result<Option<Deregistration>> {
        self.remove_registration_inner(registration_id, true).await
    }

    async fn remove_registration_inner(
        &self,
        registration_id: &str,
        only_if_expired: bool,
    ) -> Result<Option<Deregistration>> {
        let Some(endpoint) = self.resolve_endpoint(registration_id).await? else {
            return Ok(None);
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;
        let Some(registration) = self.load(&endpoint).await? else {
            return Ok(None);
        };

        if only_if_expired && registration.is_alive(self.grace_period_secs, now_millis()) {
            return Ok(None);
        }

        self.backend.del(&regstore_keys::id_index_key(registration_id)).await?;
        self.backend.del(&regstore_keys::primary_key(&endpoint)).await?;
        self.remove_address_index_if_owned(&registration.address, &endpoint).await?;
        self.remove_expiration(&endpoint).await?;
        let removed_observations =
            self.observations.remove_observations_locked(registration_id).await?;

        debug!(target: "regstore", endpoint = %endpoint, only_if_expired, "registration removed");
        Ok(Some(Deregistration { registration, removed_observations }))
    }

    /// Cardinality of the expiration queue, which equals the number of
    /// currently live registrations.
    pub async fn registration_count(&self) -> Result<u64> {
        self.backend.zcard(regstore_keys::expiration_queue_key()).await
    }

    /// Endpoints whose expiration score is `<= now`, oldest first,
    /// capped at `limit`. Used by the sweeper to bound work per tick.
    pub async fn due_for_expiration(&self, now: Millis, limit: usize) -> Result<Vec<String>> {
        let members = self
            .backend
            .zrangebyscore_limit(regstore_keys::expiration_queue_key(), now as f64, limit)
            .await?;
        Ok(members.iter().map(|m| String::from_utf8_lossy(m).into_owned()).collect())
    }
}

fn now_millis() -> Millis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as Millis
}
