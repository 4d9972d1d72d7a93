//! Agent configuration.
//!
//! Everything is sourced from environment variables so the deployment
//! manifest stays the single source of configuration. Only `NODE_NAME` is
//! required; the storage roots default to paths under `/var/lib/metalgrid`.

use crate::error::ControllerError;
use dhcp_server::AgentSettings;
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_DIR: &str = "/var/lib/metalgrid/dhcp/config";
const DEFAULT_LEASE_DIR: &str = "/var/lib/metalgrid/dhcp/lease";
const DEFAULT_LOG_DIR: &str = "/var/lib/metalgrid/dhcp/log";
const DEFAULT_TFTP_DIR: &str = "/var/lib/metalgrid/tftp";

/// Loads agent settings from the process environment.
pub fn settings_from_env() -> Result<AgentSettings, ControllerError> {
    settings_from_lookup(|key| env::var(key).ok())
}

fn settings_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AgentSettings, ControllerError> {
    let node_name = lookup("NODE_NAME").ok_or_else(|| {
        ControllerError::InvalidConfig("NODE_NAME environment variable is required".to_string())
    })?;
    if node_name.is_empty() {
        return Err(ControllerError::InvalidConfig(
            "NODE_NAME must not be empty".to_string(),
        ));
    }

    let dir = |key: &str, default: &str| {
        PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
    };

    Ok(AgentSettings {
        node_name,
        config_dir: dir("DHCP_CONFIG_DIR", DEFAULT_CONFIG_DIR),
        lease_dir: dir("DHCP_LEASE_DIR", DEFAULT_LEASE_DIR),
        log_dir: dir("DHCP_LOG_DIR", DEFAULT_LOG_DIR),
        tftp_dir: dir("TFTP_ROOT_DIR", DEFAULT_TFTP_DIR),
        config_template: lookup("DHCP_CONFIG_TEMPLATE").map(PathBuf::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_is_required() {
        let err = settings_from_lookup(|_| None);
        assert!(matches!(err, Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings_from_lookup(|key| match key {
            "NODE_NAME" => Some("node-1".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.node_name, "node-1");
        assert_eq!(settings.config_dir, PathBuf::from(DEFAULT_CONFIG_DIR));
        assert!(settings.config_template.is_none());
    }

    #[test]
    fn overrides_take_effect() {
        let settings = settings_from_lookup(|key| match key {
            "NODE_NAME" => Some("node-1".to_string()),
            "DHCP_CONFIG_DIR" => Some("/data/config".to_string()),
            "DHCP_CONFIG_TEMPLATE" => Some("/etc/metalgrid/dnsmasq.conf.j2".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.config_dir, PathBuf::from("/data/config"));
        assert_eq!(
            settings.config_template,
            Some(PathBuf::from("/etc/metalgrid/dnsmasq.conf.j2"))
        );
    }
}
