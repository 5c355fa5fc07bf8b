//! CIDR block canonicalization.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::ProviderError;

/// Parse a CIDR block and return its canonical network form.
///
/// Host bits are cleared and IPv6 addresses are printed in compressed
/// lowercase form, so `10.0.0.5/8` becomes `10.0.0.0/8` and
/// `2001:DB8::1/32` becomes `2001:db8::/32`.
pub fn canonical_cidr(cidr: &str) -> Result<String, ProviderError> {
    let (addr, prefix) = parse_cidr(cidr)?;
    let network = match addr {
        IpAddr::V4(v4) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        },
        IpAddr::V6(v6) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        },
    };
    Ok(format!("{}/{}", network, prefix))
}

/// Whether `cidr` is already a network address (no host bits set).
pub fn is_network_address(cidr: &str) -> bool {
    match (canonical_cidr(cidr), parse_cidr(cidr)) {
        (Ok(canonical), Ok((addr, prefix))) => canonical == format!("{}/{}", addr, prefix),
        _ => false,
    }
}

/// Whether two CIDR blocks denote the same network.
pub fn cidrs_equivalent(a: &str, b: &str) -> bool {
    match (canonical_cidr(a), canonical_cidr(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8), ProviderError> {
    let invalid = || ProviderError::Validation(format!("invalid CIDR block '{}'", cidr));
    let (addr, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ipv4() {
        assert_eq!(canonical_cidr("10.0.0.5/8").unwrap(), "10.0.0.0/8");
        assert_eq!(canonical_cidr("192.168.1.0/24").unwrap(), "192.168.1.0/24");
        assert_eq!(canonical_cidr("1.2.3.4/0").unwrap(), "0.0.0.0/0");
        assert_eq!(canonical_cidr("1.2.3.4/32").unwrap(), "1.2.3.4/32");
    }

    #[test]
    fn test_canonical_ipv6() {
        assert_eq!(canonical_cidr("2001:DB8::1/32").unwrap(), "2001:db8::/32");
        assert_eq!(
            canonical_cidr("2001:0db8:0000:0000:0000:0000:0000:0000/64").unwrap(),
            "2001:db8::/64"
        );
    }

    #[test]
    fn test_invalid_cidrs() {
        assert!(canonical_cidr("10.0.0.0").is_err());
        assert!(canonical_cidr("10.0.0.0/33").is_err());
        assert!(canonical_cidr("nope/8").is_err());
        assert!(canonical_cidr("::/129").is_err());
    }

    #[test]
    fn test_equivalence_and_network_address() {
        assert!(cidrs_equivalent("2001:DB8::/32", "2001:db8::/32"));
        assert!(!cidrs_equivalent("10.0.0.0/8", "10.0.0.0/16"));
        assert!(is_network_address("10.0.0.0/8"));
        assert!(!is_network_address("10.0.0.1/8"));
    }
}
