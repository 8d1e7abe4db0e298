//! Human-readable formatting for addresses, used by logging and by the
//! `statetrans.log` sink. Mirrors the original `format_ip4`/`format_ip6`/
//! `format_mac`/`format_4tuple` helpers.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

pub fn format_ip4(addr: &[u8]) -> String {
    if addr.len() != 4 {
        return "?.?.?.?".to_string();
    }
    Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]).to_string()
}

pub fn format_ip6(addr: &[u8]) -> String {
    if addr.len() != 16 {
        return "::".to_string();
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(addr);
    Ipv6Addr::from(octets).to_string()
}

pub fn format_ip(addr: &[u8], v6: bool) -> String {
    if v6 {
        format_ip6(addr)
    } else {
        format_ip4(addr)
    }
}

pub fn format_mac(mac: &[u8]) -> String {
    let mut out = String::with_capacity(mac.len() * 3);
    for (i, byte) in mac.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn format_4tuple(
    ip1: &[u8],
    port1: u16,
    ip2: &[u8],
    port2: u16,
    v6: bool,
    arrow: &str,
) -> String {
    format!(
        "{}:{}{}{}:{}",
        format_ip(ip1, v6),
        port1,
        arrow,
        format_ip(ip2, v6),
        port2
    )
}
