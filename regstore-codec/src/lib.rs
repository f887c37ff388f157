//! Record types shared by `RegistrationStore` and `ObservationStore`,
//! plus their opaque-byte-string serialization. Everything above this
//! crate treats the encoded form as a black box; only round-trip
//! fidelity is guaranteed.

mod observation;
mod registration;

pub use observation::{Observation, ObservationContext, ResourcePath};
pub use registration::{LinkAttributes, ObjectLink, Registration};

use regstore_base::Error;
use serde::{de::DeserializeOwned, Serialize};

/// Milliseconds since the Unix epoch. Plain `i64`, not `SystemTime`, so
/// records serialize compactly and compare with ordinary integer ops.
pub type Millis = i64;

pub fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, Error> {
    rmp_serde::to_vec(value).map_err(|e| Error::codec(what, e))
}

pub fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::codec(what, e))
}
