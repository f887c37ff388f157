use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::Millis;

/// A device that has announced itself to the server. `endpoint` is the
/// primary key; `id` is a server-assigned secondary identifier used by
/// callers that already know which registration-id they're updating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    pub endpoint: String,
    pub address: SocketAddr,
    pub registration_time: Millis,
    pub lifetime_secs: u32,
    pub last_update: Millis,
    pub attributes: LinkAttributes,
}

impl Registration {
    /// `lastUpdate + lifetime + gracePeriod`, all in milliseconds.
    pub fn expiration_timestamp(&self, grace_period_secs: u32) -> Millis {
        self.last_update
            + i64::from(self.lifetime_secs) * 1000
            + i64::from(grace_period_secs) * 1000
    }

    /// `now <= expirationTimestamp`.
    pub fn is_alive(&self, grace_period_secs: u32, now: Millis) -> bool {
        now <= self.expiration_timestamp(grace_period_secs)
    }
}

/// The payload carried verbatim alongside a Registration: object links,
/// protocol metadata, and queue-mode. The store never branches on any
/// of this; it exists so Codec has something concrete to round-trip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAttributes {
    pub object_links: Vec<ObjectLink>,
    pub supported_content_formats: Vec<u16>,
    pub lwm2m_version: String,
    pub queue_mode: bool,
    pub binding_modes: Option<String>,
}

/// One entry of a registration's published object tree, e.g. `/3/0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLink {
    pub object_id: u16,
    pub instance_id: Option<u16>,
}
