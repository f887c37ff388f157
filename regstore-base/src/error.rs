use tracing::error;

/// Every fallible operation in the store returns this. `NotFound` is
/// deliberately absent: lookups that find nothing return `Ok(None)`,
/// never an error (see spec kind `NotFound`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An observation operation referenced a registration-id with no
    /// live registration behind it.
    #[error("no registration with id {registration_id:?}")]
    NoSuchRegistration { registration_id: String },

    /// PeerLock could not be acquired within its retry budget.
    #[error("failed to acquire lock for endpoint {endpoint:?} after {attempts} attempts")]
    LockAcquisitionFailed { endpoint: String, attempts: u32 },

    /// A stored record's bytes did not decode. Read paths downgrade
    /// this to `Ok(None)` after logging; write paths propagate it.
    #[error("codec failure decoding {what}: {detail}")]
    Codec { what: &'static str, detail: String },

    /// Transport or server-side error from the backing store.
    #[error("backing store failure: {0}")]
    Backend(#[from] redis::RedisError),

    /// Failed to check out a pooled connection.
    #[error("connection pool failure: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// The pool itself could not be built from the given configuration.
    #[error("connection pool configuration failure: {0}")]
    PoolConfig(#[from] deadpool_redis::CreatePoolError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn codec(what: &'static str, detail: impl std::fmt::Display) -> Error {
        let err = Error::Codec { what, detail: detail.to_string() };
        error!(target: "regstore", ?err, "codec failure");
        err
    }

    pub fn no_such_registration(registration_id: impl Into<String>) -> Error {
        Error::NoSuchRegistration { registration_id: registration_id.into() }
    }

    pub fn lock_acquisition_failed(endpoint: impl Into<String>, attempts: u32) -> Error {
        let err = Error::LockAcquisitionFailed { endpoint: endpoint.into(), attempts };
        error!(target: "regstore", ?err, "lock acquisition failed");
        err
    }
}

#[cfg(test)]
mod test;
