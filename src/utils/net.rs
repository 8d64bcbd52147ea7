//! Host admission helpers for the accept loops.
//!
//! The /24 comparison is done on 32-bit host-order integers. It is a
//! heuristic for trusting machines on the server's own subnet, not a
//! security boundary.

use std::net::{IpAddr, Ipv4Addr};

/// Converts an address to its 32-bit host-order form. IPv6 peers are
/// outside the admission heuristic and map to None.
pub fn ipv4_to_host_order(addr: IpAddr) -> Option<u32> {
    match addr {
        IpAddr::V4(v4) => Some(u32::from(v4)),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(u32::from),
    }
}

/// Whether two host-order addresses share the same /24 network
pub fn same_class_c(a: u32, b: u32) -> bool {
    (a & 0xFFFF_FF00) == (b & 0xFFFF_FF00)
}

/// The primary interface address of this machine, used as the anchor for
/// the same-subnet admission check. Falls back to loopback when the
/// lookup fails (admission then degrades to loopback-only trust).
pub fn primary_interface_addr() -> Ipv4Addr {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(addr)) => addr,
        _ => Ipv4Addr::LOCALHOST,
    }
}

/// Checks whether a peer is always admitted without a ban-list lookup:
/// loopback, or on the same /24 as the server's primary interface.
pub fn is_trusted_peer(peer: IpAddr, primary: Ipv4Addr) -> bool {
    if peer.is_loopback() {
        return true;
    }
    match ipv4_to_host_order(peer) {
        Some(peer) => same_class_c(peer, u32::from(primary)),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_same_class_c() {
        let a = u32::from(Ipv4Addr::new(192, 168, 1, 10));
        let b = u32::from(Ipv4Addr::new(192, 168, 1, 250));
        let c = u32::from(Ipv4Addr::new(192, 168, 2, 10));
        assert!(same_class_c(a, b));
        assert!(!same_class_c(a, c));
    }

    #[test]
    fn test_trusted_peer() {
        let primary = Ipv4Addr::new(10, 1, 2, 3);
        assert!(is_trusted_peer(IpAddr::V4(Ipv4Addr::LOCALHOST), primary));
        assert!(is_trusted_peer(
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 99)),
            primary
        ));
        assert!(!is_trusted_peer(
            IpAddr::V4(Ipv4Addr::new(10, 1, 3, 99)),
            primary
        ));
    }
}
