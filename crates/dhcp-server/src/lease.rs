//! Lease-file parsing and diffing.
//!
//! The daemon writes one whitespace-separated record per lease:
//! `<unix-epoch-expiry> <MAC> <IP> <hostname> <client-id> ...`. Records with
//! fewer than five fields or a non-integer expiry are logged and skipped; a
//! bad line must never take the instance down.

use crate::types::DhcpClientInfo;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

/// Identity stamped onto every parsed client.
#[derive(Debug, Clone)]
pub struct LeaseContext {
    /// Subnet CIDR
    pub subnet: String,
    /// Name of the owning Subnet resource
    pub subnet_name: String,
    pub cluster_name: Option<String>,
}

/// Result of diffing a freshly parsed lease table against the previous one.
#[derive(Debug, Default)]
pub struct LeaseDiff {
    /// New or changed clients, to be announced to the discovery layer.
    /// Includes pure lease renewals.
    pub announced: Vec<DhcpClientInfo>,
    /// Clients that vanished from the table, `active` already cleared
    pub departed: Vec<DhcpClientInfo>,
    /// IP-keyed subset of `announced` whose MAC or hostname changed (or that
    /// are new), i.e. the entries that warrant a binding-file rewrite. A
    /// pure expiry change never appears here.
    pub rebind: HashMap<String, DhcpClientInfo>,
}

fn parse_expiry(field: &str) -> Option<DateTime<Utc>> {
    let epoch: i64 = field.parse().ok()?;
    DateTime::from_timestamp(epoch, 0)
}

/// Parses the lease-file content into an IP-keyed client table.
pub fn parse_lease_table(content: &str, ctx: &LeaseContext) -> HashMap<String, DhcpClientInfo> {
    let mut table = HashMap::new();

    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            warn!(subnet = %ctx.subnet_name, line, "skipping malformed lease record");
            continue;
        }
        let Some(expire) = parse_expiry(fields[0]) else {
            warn!(subnet = %ctx.subnet_name, line, "skipping lease record with bad expiry");
            continue;
        };

        // dnsmasq writes "*" for clients that did not send a hostname.
        let hostname = if fields[3] == "*" { "" } else { fields[3] };

        let client = DhcpClientInfo {
            mac: fields[1].to_string(),
            ip: fields[2].to_string(),
            hostname: hostname.to_string(),
            active: true,
            dhcp_expire_time: Some(expire),
            subnet: ctx.subnet.clone(),
            subnet_name: ctx.subnet_name.clone(),
            cluster_name: ctx.cluster_name.clone(),
        };
        table.insert(client.ip.clone(), client);
    }

    table
}

/// Diffs `next` against `previous` per IP.
///
/// - unseen IP: announced, needs rebind
/// - MAC or hostname changed: announced, needs rebind
/// - only the expiry moved: announced, but no rebind, so a pure renewal
///   never causes a binding-file rewrite or a daemon reload
/// - IP gone from `next`: returned in `departed` with `active = false`;
///   lease expiry never unbinds an IP by itself
pub fn diff_lease_tables(
    previous: &HashMap<String, DhcpClientInfo>,
    next: &HashMap<String, DhcpClientInfo>,
) -> LeaseDiff {
    let mut diff = LeaseDiff::default();

    for (ip, client) in next {
        match previous.get(ip) {
            None => {
                diff.announced.push(client.clone());
                diff.rebind.insert(ip.clone(), client.clone());
            }
            Some(prev) => {
                let identity_changed = !prev.mac.eq_ignore_ascii_case(&client.mac)
                    || prev.hostname != client.hostname;
                if identity_changed {
                    diff.announced.push(client.clone());
                    diff.rebind.insert(ip.clone(), client.clone());
                } else if prev.dhcp_expire_time != client.dhcp_expire_time {
                    diff.announced.push(client.clone());
                }
            }
        }
    }

    for (ip, prev) in previous {
        if !next.contains_key(ip) {
            let mut gone = prev.clone();
            gone.active = false;
            diff.departed.push(gone);
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> LeaseContext {
        LeaseContext {
            subnet: "10.0.0.0/24".to_string(),
            subnet_name: "sub1".to_string(),
            cluster_name: None,
        }
    }

    const LEASES: &str = "\
1893456000 aa:bb:cc:dd:ee:01 10.0.0.12 node-a 01:aa:bb:cc:dd:ee:01
1893456000 aa:bb:cc:dd:ee:02 10.0.0.13 * 01:aa:bb:cc:dd:ee:02
";

    #[test]
    fn parses_well_formed_records() {
        let table = parse_lease_table(LEASES, &ctx());
        assert_eq!(table.len(), 2);

        let a = &table["10.0.0.12"];
        assert_eq!(a.mac, "aa:bb:cc:dd:ee:01");
        assert_eq!(a.hostname, "node-a");
        assert!(a.active);
        assert_eq!(
            a.dhcp_expire_time,
            DateTime::from_timestamp(1_893_456_000, 0)
        );

        // "*" means no hostname was sent.
        assert_eq!(table["10.0.0.13"].hostname, "");
    }

    #[test]
    fn skips_malformed_records() {
        let content = "\
1893456000 aa:bb:cc:dd:ee:01 10.0.0.12 node-a 01:aa
too few fields
not-a-number aa:bb:cc:dd:ee:03 10.0.0.14 node-c 01:aa
";
        let table = parse_lease_table(content, &ctx());
        assert_eq!(table.len(), 1);
        assert!(table.contains_key("10.0.0.12"));
    }

    #[test]
    fn new_client_needs_rebind() {
        let previous = HashMap::new();
        let next = parse_lease_table(LEASES, &ctx());
        let diff = diff_lease_tables(&previous, &next);
        assert_eq!(diff.announced.len(), 2);
        assert_eq!(diff.rebind.len(), 2);
        assert!(diff.departed.is_empty());
    }

    #[test]
    fn renewal_suppresses_rebind() {
        let previous = parse_lease_table(LEASES, &ctx());
        let renewed = LEASES.replace("1893456000 aa:bb:cc:dd:ee:01", "1893459600 aa:bb:cc:dd:ee:01");
        let next = parse_lease_table(&renewed, &ctx());

        let diff = diff_lease_tables(&previous, &next);
        // The renewal is announced, but no rebind and nothing departed.
        assert_eq!(diff.announced.len(), 1);
        assert_eq!(diff.announced[0].ip, "10.0.0.12");
        assert!(diff.rebind.is_empty());
        assert!(diff.departed.is_empty());
    }

    #[test]
    fn mac_change_needs_rebind() {
        let previous = parse_lease_table(LEASES, &ctx());
        let rebound = LEASES.replace("aa:bb:cc:dd:ee:01", "aa:bb:cc:dd:ee:99");
        let next = parse_lease_table(&rebound, &ctx());

        let diff = diff_lease_tables(&previous, &next);
        assert_eq!(diff.rebind.len(), 1);
        assert_eq!(diff.rebind["10.0.0.12"].mac, "aa:bb:cc:dd:ee:99");
    }

    #[test]
    fn departed_client_is_marked_inactive() {
        let previous = parse_lease_table(LEASES, &ctx());
        let next = parse_lease_table("", &ctx());

        let diff = diff_lease_tables(&previous, &next);
        assert_eq!(diff.departed.len(), 2);
        assert!(diff.departed.iter().all(|c| !c.active));
        // Lease removal never triggers a rebind on its own.
        assert!(diff.rebind.is_empty());
    }
}
