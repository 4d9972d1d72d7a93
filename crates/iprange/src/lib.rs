//! IPv4 range-expression arithmetic.
//!
//! A range expression is a comma-separated list of tokens, where each token
//! is either a single address (`10.0.0.99`) or an inclusive span
//! (`10.0.0.10-10.0.0.50`). These expressions appear verbatim in the
//! `Subnet` CRD and in the generated dnsmasq configuration, so every other
//! crate in the workspace funnels through the functions here rather than
//! parsing the string itself.
//!
//! All comparisons treat addresses as big-endian 32-bit integers. IPv6 is
//! out of scope.

use std::net::Ipv4Addr;
use thiserror::Error;

mod mac;

pub use mac::is_valid_unicast_mac;

/// Errors produced when parsing or validating range expressions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpRangeError {
    /// A token is not a valid IPv4 address or `start-end` pair.
    #[error("invalid IP range format: {0}")]
    InvalidFormat(String),

    /// A `start-end` token where start sorts after end.
    #[error("start IP is greater than end IP in range: {0}")]
    InvalidRange(String),

    /// A token contains an address outside the subnet CIDR.
    #[error("range token {token} is not within subnet {subnet}")]
    OutOfSubnet { token: String, subnet: String },

    /// An old token is no longer fully covered by the new expression.
    #[error("IP range cannot be shrunk: token {0} is not fully covered by the new range")]
    RangeShrunk(String),

    /// A CIDR string that fails to parse.
    #[error("invalid subnet CIDR: {0}")]
    InvalidCidr(String),
}

/// One parsed token of a range expression, as an inclusive u32 interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: u32,
    end: u32,
}

fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr, IpRangeError> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| IpRangeError::InvalidFormat(s.trim().to_string()))
}

/// Parses one token into an inclusive interval.
fn parse_token(token: &str) -> Result<Interval, IpRangeError> {
    let token = token.trim();
    if let Some((start_str, end_str)) = token.split_once('-') {
        let start = ip_to_u32(parse_ipv4(start_str)?);
        let end = ip_to_u32(parse_ipv4(end_str)?);
        if start > end {
            return Err(IpRangeError::InvalidRange(token.to_string()));
        }
        Ok(Interval { start, end })
    } else {
        let single = ip_to_u32(parse_ipv4(token)?);
        Ok(Interval {
            start: single,
            end: single,
        })
    }
}

fn parse_expr(range_expr: &str) -> Result<Vec<Interval>, IpRangeError> {
    range_expr.split(',').map(parse_token).collect()
}

/// A parsed IPv4 CIDR used for containment checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    mask: u32,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Parses `a.b.c.d/len` notation.
    pub fn parse(cidr: &str) -> Result<Self, IpRangeError> {
        let (addr_str, len_str) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| IpRangeError::InvalidCidr(cidr.to_string()))?;
        let addr = addr_str
            .parse::<Ipv4Addr>()
            .map_err(|_| IpRangeError::InvalidCidr(cidr.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| IpRangeError::InvalidCidr(cidr.to_string()))?;
        if prefix_len > 32 {
            return Err(IpRangeError::InvalidCidr(cidr.to_string()));
        }
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        };
        Ok(Self {
            network: u32::from(addr) & mask,
            mask,
            prefix_len,
        })
    }

    /// Whether `ip` lies inside this CIDR.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask == self.network
    }

    fn contains_u32(&self, ip: u32) -> bool {
        ip & self.mask == self.network
    }

    /// Renders the canonical `network/len` form.
    pub fn to_display(&self) -> String {
        format!("{}/{}", Ipv4Addr::from(self.network), self.prefix_len)
    }
}

/// Counts the addresses covered by a range expression.
///
/// `count_addresses("10.0.0.1-10.0.0.10,10.0.0.20")` returns 11. Overlapping
/// tokens are counted per token, matching the original semantics.
pub fn count_addresses(range_expr: &str) -> Result<u64, IpRangeError> {
    let mut total: u64 = 0;
    for interval in parse_expr(range_expr)? {
        total += u64::from(interval.end - interval.start) + 1;
    }
    Ok(total)
}

/// Whether `ip` falls inside any token of the range expression.
///
/// Malformed tokens are skipped rather than reported, so this is safe to
/// call against operator-supplied expressions that have already passed
/// admission.
pub fn contains(ip: Ipv4Addr, range_expr: &str) -> bool {
    let target = ip_to_u32(ip);
    range_expr
        .split(',')
        .filter_map(|token| parse_token(token).ok())
        .any(|iv| iv.start <= target && target <= iv.end)
}

/// Validates that every address of every token lies inside `cidr`.
pub fn validate_within_subnet(range_expr: &str, cidr: &str) -> Result<(), IpRangeError> {
    let subnet = Ipv4Cidr::parse(cidr)?;
    for token in range_expr.split(',') {
        let interval = parse_token(token)?;
        if !subnet.contains_u32(interval.start) || !subnet.contains_u32(interval.end) {
            return Err(IpRangeError::OutOfSubnet {
                token: token.trim().to_string(),
                subnet: subnet.to_display(),
            });
        }
    }
    Ok(())
}

/// Validates that `new_expr` covers every token of `old_expr`.
///
/// This is a one-directional covering check: each old token must fit
/// entirely inside some single new token; the new expression may add
/// disjoint extra tokens freely. Both expressions must also be valid within
/// `cidr`.
pub fn validate_expansion(
    old_expr: &str,
    new_expr: &str,
    cidr: &str,
) -> Result<(), IpRangeError> {
    validate_within_subnet(old_expr, cidr)?;
    validate_within_subnet(new_expr, cidr)?;

    let new_intervals = parse_expr(new_expr)?;
    for token in old_expr.split(',') {
        let old = parse_token(token)?;
        let covered = new_intervals
            .iter()
            .any(|new| new.start <= old.start && old.end <= new.end);
        if !covered {
            return Err(IpRangeError::RangeShrunk(token.trim().to_string()));
        }
    }
    Ok(())
}

/// Whether `name` is a valid Linux interface name (alnum, `_`, `-`, max 15
/// characters).
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mixed_expression() {
        assert_eq!(
            count_addresses("10.0.0.1-10.0.0.10,10.0.0.20").unwrap(),
            11
        );
    }

    #[test]
    fn count_single_address() {
        assert_eq!(count_addresses("192.168.0.1").unwrap(), 1);
    }

    #[test]
    fn count_rejects_malformed_token() {
        assert!(matches!(
            count_addresses("10.0.0.1-10.0.0"),
            Err(IpRangeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn count_rejects_inverted_range() {
        assert!(matches!(
            count_addresses("10.0.0.10-10.0.0.1"),
            Err(IpRangeError::InvalidRange(_))
        ));
    }

    #[test]
    fn contains_matches_span_and_single() {
        let expr = "192.168.1.10-192.168.1.20,192.168.1.30";
        assert!(contains("192.168.1.15".parse().unwrap(), expr));
        assert!(contains("192.168.1.30".parse().unwrap(), expr));
        assert!(!contains("192.168.1.25".parse().unwrap(), expr));
    }

    #[test]
    fn within_subnet_accepts_valid_range() {
        assert!(validate_within_subnet("192.168.1.10-192.168.1.20", "192.168.1.0/24").is_ok());
    }

    #[test]
    fn within_subnet_names_offending_token() {
        let err =
            validate_within_subnet("192.168.1.10-192.168.2.20", "192.168.1.0/24").unwrap_err();
        match err {
            IpRangeError::OutOfSubnet { token, .. } => {
                assert_eq!(token, "192.168.1.10-192.168.2.20");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expansion_accepts_wider_range() {
        assert!(validate_expansion(
            "10.0.0.10-10.0.0.20",
            "10.0.0.5-10.0.0.25",
            "10.0.0.0/24"
        )
        .is_ok());
    }

    #[test]
    fn expansion_rejects_shrunk_lower_bound() {
        let err = validate_expansion(
            "10.0.0.10-10.0.0.20",
            "10.0.0.12-10.0.0.25",
            "10.0.0.0/24",
        )
        .unwrap_err();
        assert_eq!(err, IpRangeError::RangeShrunk("10.0.0.10-10.0.0.20".into()));
    }

    #[test]
    fn expansion_allows_disjoint_extra_tokens() {
        assert!(validate_expansion(
            "10.0.0.10-10.0.0.20",
            "10.0.0.10-10.0.0.20,10.0.0.200",
            "10.0.0.0/24"
        )
        .is_ok());
    }

    #[test]
    fn expansion_requires_single_covering_token() {
        // Two adjacent new tokens together cover the old token, but no
        // single token does; the covering check is per token.
        let err = validate_expansion(
            "10.0.0.10-10.0.0.20",
            "10.0.0.10-10.0.0.15,10.0.0.16-10.0.0.20",
            "10.0.0.0/24",
        )
        .unwrap_err();
        assert!(matches!(err, IpRangeError::RangeShrunk(_)));
    }

    #[test]
    fn cidr_parse_and_contains() {
        let cidr = Ipv4Cidr::parse("172.16.0.0/12").unwrap();
        assert!(cidr.contains("172.20.1.1".parse().unwrap()));
        assert!(!cidr.contains("172.32.0.1".parse().unwrap()));
        assert!(Ipv4Cidr::parse("1.2.3.4/33").is_err());
        assert!(Ipv4Cidr::parse("not-a-cidr").is_err());
    }

    #[test]
    fn interface_name_rules() {
        assert!(is_valid_interface_name("eth0"));
        assert!(is_valid_interface_name("bond0-mgmt"));
        assert!(!is_valid_interface_name("my@interface"));
        assert!(!is_valid_interface_name("averylonginterface0"));
        assert!(!is_valid_interface_name(""));
    }
}
