//! Address parsing and family-aware ordering.

use ipnet::IpNet;
use std::cmp::Ordering;
use std::net::IpAddr;

/// Parses an IP literal; IPv4-mapped IPv6 literals become IPv4.
pub(crate) fn parse_ip(value: &str) -> Option<IpAddr> {
    value.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Parses a CIDR; host bits may be set.
pub(crate) fn parse_subnet(value: &str) -> Option<IpNet> {
    value.parse::<IpNet>().ok()
}

/// Orders two addresses: plain IPv4 order when both are IPv4, otherwise their
/// 16-byte forms with IPv4 mapped into IPv6.
pub(crate) fn compare(a: IpAddr, b: IpAddr) -> Ordering {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.cmp(&b),
        _ => sixteen_bytes(a).cmp(&sixteen_bytes(b)),
    }
}

/// True if `ip` lies in the inclusive range `[start, end]`.
pub(crate) fn in_range(ip: IpAddr, start: IpAddr, end: IpAddr) -> bool {
    compare(ip, start) != Ordering::Less && compare(ip, end) != Ordering::Greater
}

fn sixteen_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(value: &str) -> IpAddr {
        parse_ip(value).unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(ip("10.0.0.1"), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(ip("::ffff:10.0.0.1"), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert!(parse_ip("10.0.0.256").is_none());
        assert!(parse_ip("10.0.0.0/24").is_none());
        assert!(parse_subnet("10.0.0.0/24").is_some());
        assert!(parse_subnet("10.0.0.7/24").is_some());
        assert!(parse_subnet("10.0.0.0").is_none());
    }

    #[test]
    fn test_compare_v4_numerically() {
        assert_eq!(compare(ip("10.0.0.9"), ip("10.0.0.10")), Ordering::Less);
        assert_eq!(compare(ip("10.0.1.0"), ip("10.0.0.255")), Ordering::Greater);
        assert!(in_range(ip("10.0.0.10"), ip("10.0.0.10"), ip("10.0.0.10")));
    }

    #[test]
    fn test_compare_v6() {
        assert!(in_range(ip("2001:db8::15"), ip("2001:db8::10"), ip("2001:db8::20")));
        assert!(!in_range(ip("2001:db8::21"), ip("2001:db8::10"), ip("2001:db8::20")));
    }

    #[test]
    fn test_mixed_families_use_mapped_form() {
        // Every IPv4 address maps below 2001:db8::/32.
        assert_eq!(compare(ip("10.0.0.1"), ip("2001:db8::1")), Ordering::Less);
        assert!(!in_range(ip("10.0.0.1"), ip("2001:db8::1"), ip("2001:db8::ff")));
    }
}
