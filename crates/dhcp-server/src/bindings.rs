//! Binding-file maintenance.
//!
//! The binding file is a dnsmasq conf-file fragment referenced from the main
//! config. Each binding is a `dhcp-host=<MAC>,<IP>` line, optionally
//! preceded by a `# hostname <name>` comment. The file is maintained by
//! diffing added/deleted binding sets against the current file content
//! line-by-line, rather than regenerating it from the in-memory tables:
//! bindings contributed outside the currently tracked sets (for example by a
//! previous process lifetime) must survive a rewrite, and re-applying the
//! same sets twice must be a no-op.

use crate::types::DhcpClientInfo;
use std::collections::{BTreeMap, HashMap, HashSet};

const HOSTNAME_COMMENT_PREFIX: &str = "# hostname ";
const DHCP_HOST_PREFIX: &str = "dhcp-host=";

/// Parses a `dhcp-host=<MAC>,<IP>` line into `(mac, ip)`.
fn parse_dhcp_host(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(DHCP_HOST_PREFIX)?;
    let (mac, ip) = rest.split_once(',')?;
    let mac = mac.trim();
    let ip = ip.trim();
    if mac.is_empty() || ip.is_empty() {
        return None;
    }
    Some((mac, ip))
}

fn macs_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn emit_binding(out: &mut Vec<String>, client: &DhcpClientInfo) {
    if !client.hostname.is_empty() {
        out.push(format!("{HOSTNAME_COMMENT_PREFIX}{}", client.hostname));
    }
    out.push(format!("{DHCP_HOST_PREFIX}{},{}", client.mac, client.ip));
}

/// Recomputes the binding-file content from the existing content plus the
/// `added` and `deleted` sets (both keyed by IP).
///
/// Existing lines are scanned in order:
/// - a binding whose IP appears in `deleted` with a matching MAC is dropped
///   together with its hostname comment; a mismatched MAC leaves the line
///   untouched, so a racing delete can never remove a line that has since
///   been rebound to a different MAC;
/// - a binding whose IP appears in `added` is replaced in place, preserving
///   its position in the file;
/// - everything else, including unrelated lines, is kept verbatim.
///
/// `added` entries whose IP was never seen are appended at the end, in IP
/// order. The returned content carries a trailing newline whenever it is
/// non-empty.
pub fn merge_binding_lines(
    existing: &str,
    added: &BTreeMap<String, DhcpClientInfo>,
    deleted: &HashMap<String, DhcpClientInfo>,
) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut pending_comment: Option<&str> = None;
    let mut updated_in_place: HashSet<&str> = HashSet::new();

    for line in existing.lines() {
        if line.starts_with(HOSTNAME_COMMENT_PREFIX) {
            // Carry the comment; it belongs to the binding on the next line.
            if let Some(prev) = pending_comment.take() {
                out.push(prev.to_string());
            }
            pending_comment = Some(line);
            continue;
        }

        let Some((mac, ip)) = parse_dhcp_host(line) else {
            if let Some(comment) = pending_comment.take() {
                out.push(comment.to_string());
            }
            out.push(line.to_string());
            continue;
        };

        if let Some(gone) = deleted.get(ip) {
            if macs_equal(&gone.mac, mac) {
                // Drop the line and its comment.
                pending_comment = None;
                continue;
            }
        }

        if let Some(client) = added.get(ip) {
            // Update in place: new MAC/hostname, same file position.
            pending_comment = None;
            emit_binding(&mut out, client);
            updated_in_place.insert(ip);
            continue;
        }

        if let Some(comment) = pending_comment.take() {
            out.push(comment.to_string());
        }
        out.push(line.to_string());
    }

    if let Some(comment) = pending_comment.take() {
        out.push(comment.to_string());
    }

    for (ip, client) in added {
        if !updated_in_place.contains(ip.as_str()) {
            emit_binding(&mut out, client);
        }
    }

    if out.is_empty() {
        String::new()
    } else {
        let mut content = out.join("\n");
        content.push('\n');
        content
    }
}

/// IPs currently bound in a binding-file content, with their MACs.
pub fn bound_entries(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(parse_dhcp_host)
        .map(|(mac, ip)| (ip.to_string(), mac.to_string()))
        .collect()
}
