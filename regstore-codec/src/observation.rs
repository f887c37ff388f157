use serde::{Deserialize, Serialize};

/// A long-lived subscription to a resource path on a device. Tokens are
/// opaque bytes assigned by the transport layer; the store treats them
/// as an unconditioned byte string throughout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub token: Vec<u8>,
    pub registration_id: String,
    pub path: ResourcePath,
    pub context: ObservationContext,
}

/// An object/instance/resource coordinate, e.g. `/3/0/1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePath {
    pub object_id: u16,
    pub instance_id: Option<u16>,
    pub resource_id: Option<u16>,
}

/// Protocol metadata carried alongside an observation. `endpoint_context`
/// is the field `setContext` updates; without it, NAT rebinding for a
/// roaming peer can leave stale routing state behind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationContext {
    pub content_format: u16,
    pub request_token: Vec<u8>,
    pub endpoint_context: Option<String>,
}
