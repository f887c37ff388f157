use crate::*;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

#[test]
fn key_families_never_collide_on_prefix() {
    let ep = "dev-A";
    assert_ne!(primary_key(ep), id_index_key(ep));
    assert_ne!(primary_key(ep), lock_key(ep));
    assert_ne!(id_index_key(ep), observation_index_key(ep));
    assert!(primary_key(ep).starts_with(b"REG:EP:"));
    assert!(id_index_key(ep).starts_with(b"EP:REGID:"));
    assert!(lock_key(ep).starts_with(b"LOCK:EP:"));
    assert!(observation_index_key(ep).starts_with(b"TKNS:REGID:"));
}

#[test]
fn observation_key_is_binary_safe() {
    let token: &[u8] = &[0xAB, 0x00, 0xCD, 0xFF];
    let key = observation_key(token);
    assert!(key.ends_with(token));
    assert!(key.starts_with(b"OBS:TKN:"));
}

#[test]
fn ipv4_address_round_trips_through_text_form() {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5683));
    let text = addr_to_text(&addr);
    assert_eq!(text, "10.0.0.1:5683");
    assert_eq!(text.parse::<SocketAddr>().unwrap(), addr);
}

#[test]
fn ipv6_address_with_zone_is_stable_and_distinct_per_scope() {
    // `std`'s `FromStr` for `SocketAddrV6` does not accept the `%scope`
    // suffix its own `Display` emits, so round-tripping through text is
    // not available here; what this key scheme actually needs is a
    // stable, collision-free textual form, which these assertions check
    // directly instead.
    let addr = SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
        5683,
        0,
        3,
    ));
    let text = addr_to_text(&addr);
    assert_eq!(text, "[fe80::1%3]:5683");
    assert_eq!(addr_to_text(&addr), text, "stringification must be stable across calls");
    assert!(addr_index_key(&addr).ends_with(text.as_bytes()));

    let other_scope = SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
        5683,
        0,
        4,
    ));
    assert_ne!(addr_index_key(&addr), addr_index_key(&other_scope));
}

#[test]
fn endpoint_names_with_non_ascii_utf8_are_preserved() {
    let ep = "d\u{e9}vice-\u{263a}";
    let key = primary_key(ep);
    assert!(key.ends_with(ep.as_bytes()));
}
