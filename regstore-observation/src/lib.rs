//! Observation storage: a token-indexed record grouped by the
//! registration that owns it. Two surfaces share the same storage —
//! the upper surface (`add_observation`/`remove_observation`/
//! `get_observation`/`get_observations`/`remove_observations`), driven
//! by registration-id and used by protocol handlers; and the lower
//! surface (`put`/`put_if_absent`/`get`/`remove`/`set_context`), driven
//! by raw token and used by the transport layer managing long-lived
//! message contexts independently of registration lifecycle.

use std::sync::Arc;

use regstore_base::{Error, KvBackend, Result};
use regstore_codec::{decode, encode, Observation, ResourcePath};
use regstore_lock::PeerLock;
use tracing::warn;

pub struct ObservationStore {
    backend: Arc<dyn KvBackend>,
    lock: Arc<PeerLock>,
}

impl ObservationStore {
    pub fn new(backend: Arc<dyn KvBackend>, lock: Arc<PeerLock>) -> Self {
        Self { backend, lock }
    }

    async fn resolve_endpoint(&self, registration_id: &str) -> Result<Option<String>> {
        let bytes = self
            .backend
            .get(&regstore_keys::id_index_key(registration_id))
            .await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    async fn require_endpoint(&self, registration_id: &str) -> Result<String> {
        self.resolve_endpoint(registration_id)
            .await?
            .ok_or_else(|| Error::no_such_registration(registration_id))
    }

    async fn decode_observation(&self, bytes: &[u8]) -> Result<Observation> {
        decode("observation", bytes)
    }

    // --- lower surface -----------------------------------------------

    /// Unconditional write. Overwrites a colliding token, logging a
    /// warning, and returns the value it replaced (if any).
    pub async fn put(&self, token: &[u8], obs: Observation) -> Result<Option<Observation>> {
        self.require_endpoint(&obs.registration_id).await?;
        let registration_id = obs.registration_id.clone();
        let encoded = encode("observation", &obs)?;
        let prev_bytes = self
            .backend
            .getset(&regstore_keys::observation_key(token), &encoded)
            .await?;
        self.backend
            .lpush(&regstore_keys::observation_index_key(&registration_id), token)
            .await?;
        match prev_bytes {
            Some(bytes) => {
                let prev = self.decode_observation(&bytes).await?;
                warn!(
                    target: "regstore",
                    token = %hex(token),
                    "observation token collision on put; overwriting prior value",
                );
                Ok(Some(prev))
            }
            None => Ok(None),
        }
    }

    /// Like `put`, but preserves any existing value instead of
    /// overwriting it, returning that existing value.
    pub async fn put_if_absent(
        &self,
        token: &[u8],
        obs: Observation,
    ) -> Result<Option<Observation>> {
        if let Some(existing) = self.get(token).await? {
            return Ok(Some(existing));
        }
        self.require_endpoint(&obs.registration_id).await?;
        let registration_id = obs.registration_id.clone();
        let encoded = encode("observation", &obs)?;
        self.backend
            .set(&regstore_keys::observation_key(token), &encoded)
            .await?;
        self.backend
            .lpush(&regstore_keys::observation_index_key(&registration_id), token)
            .await?;
        Ok(None)
    }

    pub async fn get(&self, token: &[u8]) -> Result<Option<Observation>> {
        match self.backend.get(&regstore_keys::observation_key(token)).await? {
            Some(bytes) => Ok(Some(self.decode_observation(&bytes).await?)),
            None => Ok(None),
        }
    }

    /// Deletes the token-indexed record and its entry in the owning
    /// registration's token list, iff the token is currently bound to
    /// something. Takes `PeerLock` over the owning endpoint.
    pub async fn remove(&self, token: &[u8]) -> Result<Option<Observation>> {
        let Some(obs) = self.get(token).await? else {
            return Ok(None);
        };
        let Some(endpoint) = self.resolve_endpoint(&obs.registration_id).await? else {
            // Owning registration already gone (e.g. a bulk removal
            // racing this call); nothing left to serialize against.
            self.backend.del(&regstore_keys::observation_key(token)).await?;
            return Ok(Some(obs));
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;
        self.backend.del(&regstore_keys::observation_key(token)).await?;
        self.backend
            .lrem(&regstore_keys::observation_index_key(&obs.registration_id), token)
            .await?;
        Ok(Some(obs))
    }

    /// Updates transport correlation metadata on an existing
    /// observation. A no-op if the token is unbound or its owning
    /// registration has already vanished.
    pub async fn set_context(&self, token: &[u8], endpoint_context: Option<String>) -> Result<()> {
        let Some(mut obs) = self.get(token).await? else {
            return Ok(());
        };
        let Some(endpoint) = self.resolve_endpoint(&obs.registration_id).await? else {
            return Ok(());
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;
        obs.context.endpoint_context = endpoint_context;
        let encoded = encode("observation", &obs)?;
        self.backend.set(&regstore_keys::observation_key(token), &encoded).await?;
        Ok(())
    }

    // --- upper surface -------------------------------------------------

    /// Evicts any pre-existing observation on `(registration_id, O.path)`
    /// whose token differs from `O`'s, returning the evicted set. Does
    /// not insert `O` itself; the caller is expected to have already
    /// done so via `put`. That ordering requirement is enforced here:
    /// if `obs.token` is not already present at supersession time, this
    /// panics in debug builds and returns `Error::NoSuchRegistration` in
    /// release, rather than silently evicting on top of a record that
    /// was never written.
    pub async fn add_observation(
        &self,
        registration_id: &str,
        obs: &Observation,
    ) -> Result<Vec<Observation>> {
        let Some(endpoint) = self.resolve_endpoint(registration_id).await? else {
            return Ok(Vec::new());
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;

        if self.get(&obs.token).await?.is_none() {
            debug_assert!(
                false,
                "add_observation called for token {} before put inserted it",
                hex(&obs.token),
            );
            return Err(Error::no_such_registration(registration_id));
        }

        let existing = self.get_observations_unlocked(registration_id).await?;
        let mut evicted = Vec::new();
        for candidate in existing {
            if candidate.token != obs.token && paths_match(&candidate.path, &obs.path) {
                self.backend
                    .del(&regstore_keys::observation_key(&candidate.token))
                    .await?;
                self.backend
                    .lrem(
                        &regstore_keys::observation_index_key(registration_id),
                        &candidate.token,
                    )
                    .await?;
                evicted.push(candidate);
            }
        }
        Ok(evicted)
    }

    /// Deletes the token-indexed record iff it belongs to
    /// `registration_id` (guards against token reuse across
    /// registrations after the owning registration is long gone).
    pub async fn remove_observation(
        &self,
        registration_id: &str,
        token: &[u8],
    ) -> Result<Option<Observation>> {
        let Some(endpoint) = self.resolve_endpoint(registration_id).await? else {
            return Ok(None);
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;
        let Some(obs) = self.get(token).await? else {
            return Ok(None);
        };
        if obs.registration_id != registration_id {
            return Ok(None);
        }
        self.backend.del(&regstore_keys::observation_key(token)).await?;
        self.backend
            .lrem(&regstore_keys::observation_index_key(registration_id), token)
            .await?;
        Ok(Some(obs))
    }

    pub async fn get_observation(
        &self,
        registration_id: &str,
        token: &[u8],
    ) -> Result<Option<Observation>> {
        match self.get(token).await? {
            Some(obs) if obs.registration_id == registration_id => Ok(Some(obs)),
            _ => Ok(None),
        }
    }

    pub async fn get_observations(&self, registration_id: &str) -> Result<Vec<Observation>> {
        self.get_observations_unlocked(registration_id).await
    }

    async fn get_observations_unlocked(&self, registration_id: &str) -> Result<Vec<Observation>> {
        let tokens = self
            .backend
            .lrange(&regstore_keys::observation_index_key(registration_id), 0, -1)
            .await?;
        let keys: Vec<Vec<u8>> =
            tokens.iter().map(|t| regstore_keys::observation_key(t)).collect();
        let values = self.backend.mget(&keys).await?;
        let mut out = Vec::with_capacity(values.len());
        for value in values.into_iter().flatten() {
            out.push(self.decode_observation(&value).await?);
        }
        Ok(out)
    }

    /// Bulk-deletes every observation owned by `registration_id`. Used
    /// by registration removal so no observation outlives its owner.
    /// Assumes the caller already holds `PeerLock` over the owning
    /// endpoint from removing the registration itself, so this does
    /// not re-acquire it.
    pub async fn remove_observations_locked(
        &self,
        registration_id: &str,
    ) -> Result<Vec<Observation>> {
        let observations = self.get_observations_unlocked(registration_id).await?;
        for obs in &observations {
            self.backend.del(&regstore_keys::observation_key(&obs.token)).await?;
        }
        self.backend
            .del(&regstore_keys::observation_index_key(registration_id))
            .await?;
        Ok(observations)
    }

    /// Same as `remove_observations_locked` but acquires its own lock;
    /// for callers (protocol handlers) that are not already inside a
    /// registration-level critical section.
    pub async fn remove_observations(&self, registration_id: &str) -> Result<Vec<Observation>> {
        let Some(endpoint) = self.resolve_endpoint(registration_id).await? else {
            return Ok(Vec::new());
        };
        let _guard = self.lock.acquire(&regstore_keys::lock_key(&endpoint)).await?;
        self.remove_observations_locked(registration_id).await
    }
}

fn paths_match(a: &ResourcePath, b: &ResourcePath) -> bool {
    a.object_id == b.object_id && a.instance_id == b.instance_id && a.resource_id == b.resource_id
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod test;
