//! Unicast MAC address validation.
//!
//! Accepts the colon, hyphen, and bare-hex spellings operators commonly
//! paste into `BindingIp` resources.

/// Whether `mac` is a well-formed 48-bit unicast MAC address.
///
/// Multicast and broadcast addresses (least significant bit of the first
/// octet set) are rejected: binding a DHCP lease to either would be a
/// configuration mistake.
pub fn is_valid_unicast_mac(mac: &str) -> bool {
    let normalized = mac.replace('-', ":");
    // Pair slicing below indexes by byte, so multi-byte characters must be
    // rejected before the length check.
    if !normalized.is_ascii() {
        return false;
    }

    let octets: Vec<&str> = if normalized.contains(':') {
        normalized.split(':').collect()
    } else if normalized.len() == 12 {
        // Bare hex: split into pairs.
        (0..6).map(|i| &normalized[i * 2..i * 2 + 2]).collect()
    } else {
        return false;
    };

    if octets.len() != 6 {
        return false;
    }

    let mut parsed = [0u8; 6];
    for (i, octet) in octets.iter().enumerate() {
        if octet.len() != 2 {
            return false;
        }
        match u8::from_str_radix(octet, 16) {
            Ok(v) => parsed[i] = v,
            Err(_) => return false,
        }
    }

    // Unicast only.
    parsed[0] & 1 == 0
}

#[cfg(test)]
mod tests {
    use super::is_valid_unicast_mac;

    #[test]
    fn accepts_common_spellings() {
        assert!(is_valid_unicast_mac("00:11:22:33:44:55"));
        assert!(is_valid_unicast_mac("00-11-22-33-44-55"));
        assert!(is_valid_unicast_mac("001122334455"));
    }

    #[test]
    fn rejects_multicast_and_broadcast() {
        assert!(!is_valid_unicast_mac("01:00:5e:00:00:00"));
        assert!(!is_valid_unicast_mac("ff:ff:ff:ff:ff:ff"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(!is_valid_unicast_mac("00:11:22:33:44"));
        assert!(!is_valid_unicast_mac("00:11:22:33:44:5g"));
        assert!(!is_valid_unicast_mac("0011223344"));
        assert!(!is_valid_unicast_mac(""));
    }

    #[test]
    fn rejects_non_ascii_without_panicking() {
        // Twelve bytes but four characters; byte-indexed pair slicing must
        // not land inside a character.
        assert!(!is_valid_unicast_mac("€€€€"));
        assert!(!is_valid_unicast_mac("ααα:ααα"));
        assert!(!is_valid_unicast_mac("00:11:22:33:44:５５"));
    }
}
