//! FloatingIPPool admission checks.

use super::ValidationResult;
use super::address::{compare, in_range, parse_ip, parse_subnet};
use crds::FloatingIPPoolSpec;
use std::cmp::Ordering;

/// Validates the internal consistency of a pool definition.
pub fn validate_floating_ip_pool(spec: &FloatingIPPoolSpec) -> ValidationResult {
    match check_pool(spec) {
        Ok(()) => ValidationResult::allowed(),
        Err(message) => ValidationResult::denied(message),
    }
}

fn check_pool(spec: &FloatingIPPoolSpec) -> Result<(), String> {
    let config = &spec.ip_config;
    let range = &config.pool;

    let subnet = parse_subnet(&config.subnet)
        .ok_or_else(|| format!("invalid subnet format: {}", config.subnet))?;

    let start = parse_ip(&range.start)
        .ok_or_else(|| format!("invalid start IP address format: {}", range.start))?;
    if !subnet.contains(&start) {
        return Err(format!(
            "start IP address {} is not within the subnet {}",
            range.start, config.subnet
        ));
    }

    let end = parse_ip(&range.end)
        .ok_or_else(|| format!("invalid end IP address format: {}", range.end))?;
    if !subnet.contains(&end) {
        return Err(format!(
            "end IP address {} is not within the subnet {}",
            range.end, config.subnet
        ));
    }

    if compare(start, end) == Ordering::Greater {
        return Err(format!(
            "start IP address {} must be less than or equal to end IP address {}",
            range.start, range.end
        ));
    }

    for excluded in &range.exclude {
        let ip = parse_ip(excluded)
            .ok_or_else(|| format!("invalid excluded IP address format: {excluded}"))?;
        if !subnet.contains(&ip) {
            return Err(format!(
                "excluded IP address {excluded} is not within the subnet {}",
                config.subnet
            ));
        }
        if !in_range(ip, start, end) {
            return Err(format!(
                "excluded IP address {excluded} is not within the pool range [{}, {}]",
                range.start, range.end
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{IPConfig, Pool};

    fn spec(subnet: &str, start: &str, end: &str, exclude: &[&str]) -> FloatingIPPoolSpec {
        FloatingIPPoolSpec {
            ip_config: IPConfig {
                subnet: subnet.to_string(),
                pool: Pool {
                    start: start.to_string(),
                    end: end.to_string(),
                    exclude: exclude.iter().map(ToString::to_string).collect(),
                },
            },
        }
    }

    fn message(spec: &FloatingIPPoolSpec) -> String {
        let result = validate_floating_ip_pool(spec);
        assert!(!result.allowed);
        result.message.unwrap()
    }

    #[test]
    fn test_valid_pool() {
        let result = validate_floating_ip_pool(&spec(
            "192.168.1.0/24",
            "192.168.1.10",
            "192.168.1.100",
            &["192.168.1.50"],
        ));
        assert_eq!(result, ValidationResult::allowed());
    }

    #[test]
    fn test_single_address_pool() {
        assert!(
            validate_floating_ip_pool(&spec("10.0.0.0/24", "10.0.0.7", "10.0.0.7", &[])).allowed
        );
    }

    #[test]
    fn test_ipv6_pool() {
        assert!(
            validate_floating_ip_pool(&spec(
                "2001:db8::/64",
                "2001:db8::10",
                "2001:db8::20",
                &["2001:db8::11"]
            ))
            .allowed
        );
    }

    #[test]
    fn test_invalid_subnet() {
        assert_eq!(
            message(&spec("192.168.1.0/33", "192.168.1.10", "192.168.1.20", &[])),
            "invalid subnet format: 192.168.1.0/33"
        );
    }

    #[test]
    fn test_invalid_bounds() {
        assert_eq!(
            message(&spec("192.168.1.0/24", "x", "192.168.1.20", &[])),
            "invalid start IP address format: x"
        );
        assert_eq!(
            message(&spec("192.168.1.0/24", "192.168.1.10", "", &[])),
            "invalid end IP address format: "
        );
    }

    #[test]
    fn test_bounds_outside_subnet() {
        assert_eq!(
            message(&spec("192.168.1.0/24", "192.168.2.10", "192.168.1.20", &[])),
            "start IP address 192.168.2.10 is not within the subnet 192.168.1.0/24"
        );
        assert_eq!(
            message(&spec("192.168.1.0/24", "192.168.1.10", "192.168.2.20", &[])),
            "end IP address 192.168.2.20 is not within the subnet 192.168.1.0/24"
        );
    }

    #[test]
    fn test_start_after_end() {
        assert_eq!(
            message(&spec("192.168.1.0/24", "192.168.1.100", "192.168.1.10", &[])),
            "start IP address 192.168.1.100 must be less than or equal to end IP address 192.168.1.10"
        );
    }

    #[test]
    fn test_start_after_end_is_numeric() {
        // "192.168.1.9" sorts after "192.168.1.10" as text but not as an address.
        assert!(
            validate_floating_ip_pool(&spec("192.168.1.0/24", "192.168.1.9", "192.168.1.10", &[]))
                .allowed
        );
    }

    #[test]
    fn test_invalid_exclusions() {
        assert_eq!(
            message(&spec("192.168.1.0/24", "192.168.1.10", "192.168.1.20", &["nope"])),
            "invalid excluded IP address format: nope"
        );
        assert_eq!(
            message(&spec(
                "192.168.1.0/24",
                "192.168.1.10",
                "192.168.1.20",
                &["192.168.2.15"]
            )),
            "excluded IP address 192.168.2.15 is not within the subnet 192.168.1.0/24"
        );
        assert_eq!(
            message(&spec(
                "192.168.1.0/24",
                "192.168.1.10",
                "192.168.1.20",
                &["192.168.1.15", "192.168.1.5"]
            )),
            "excluded IP address 192.168.1.5 is not within the pool range [192.168.1.10, 192.168.1.20]"
        );
    }
}
