//! The bijection between logical entity coordinates (endpoint names,
//! registration ids, tokens, socket addresses) and the flat byte-string
//! keys used in the backing key/value store.
//!
//! Every key is built by concatenating a fixed prefix with an
//! identifier; prefixes are chosen so no two families can collide
//! regardless of what the identifier bytes happen to contain.

use std::net::SocketAddr;

const PREFIX_REG_EP: &[u8] = b"REG:EP:";
const PREFIX_EP_REGID: &[u8] = b"EP:REGID:";
const PREFIX_EP_ADDR: &[u8] = b"EP:ADDR:";
const PREFIX_LOCK_EP: &[u8] = b"LOCK:EP:";
const PREFIX_OBS_TKN: &[u8] = b"OBS:TKN:";
const PREFIX_TKNS_REGID: &[u8] = b"TKNS:REGID:";
const EXPIRATION_QUEUE_KEY: &[u8] = b"EXP:EP";

fn with_prefix(prefix: &[u8], ident: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + ident.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(ident);
    key
}

/// Primary record key: `REG:EP:<endpoint>` -> serialized Registration.
pub fn primary_key(endpoint: &str) -> Vec<u8> {
    with_prefix(PREFIX_REG_EP, endpoint.as_bytes())
}

/// The byte prefix shared by every primary record key, for scanning
/// the whole registration keyspace.
pub fn primary_key_prefix() -> &'static [u8] {
    PREFIX_REG_EP
}

/// Id-index key: `EP:REGID:<registrationId>` -> endpoint bytes.
pub fn id_index_key(registration_id: &str) -> Vec<u8> {
    with_prefix(PREFIX_EP_REGID, registration_id.as_bytes())
}

/// Address-index key: `EP:ADDR:<ip:port>` -> endpoint bytes.
///
/// Uses `SocketAddr`'s own `Display`, which already produces a stable
/// textual form for both IPv4 (`ip:port`) and IPv6 (`[ip%scope]:port`,
/// scope omitted when zero) that two equal addresses always agree on.
pub fn addr_index_key(addr: &SocketAddr) -> Vec<u8> {
    with_prefix(PREFIX_EP_ADDR, addr.to_string().as_bytes())
}

/// Lock key: `LOCK:EP:<endpoint>` -> random lock token.
pub fn lock_key(endpoint: &str) -> Vec<u8> {
    with_prefix(PREFIX_LOCK_EP, endpoint.as_bytes())
}

/// Observation record key: `OBS:TKN:<token>` -> serialized Observation.
/// Tokens are opaque bytes, not necessarily valid UTF-8.
pub fn observation_key(token: &[u8]) -> Vec<u8> {
    with_prefix(PREFIX_OBS_TKN, token)
}

/// Observation index key: `TKNS:REGID:<registrationId>` -> list of tokens.
pub fn observation_index_key(registration_id: &str) -> Vec<u8> {
    with_prefix(PREFIX_TKNS_REGID, registration_id.as_bytes())
}

/// The singleton expiration priority queue: endpoint -> expirationTimestamp.
pub fn expiration_queue_key() -> &'static [u8] {
    EXPIRATION_QUEUE_KEY
}

/// Textual form used as the value/member for the address index and
/// expiration queue; stable, see `addr_index_key`.
pub fn addr_to_text(addr: &SocketAddr) -> String {
    addr.to_string()
}

#[cfg(test)]
mod test;
