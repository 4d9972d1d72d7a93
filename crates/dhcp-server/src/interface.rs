//! Network interface provisioning.
//!
//! Each subnet gets a managed sub-interface on its configured base
//! interface: a VLAN sub-interface when a VLAN ID is set, a bridge-mode
//! macvlan otherwise. Provisioning is idempotent; cleanup removes every
//! managed sub-interface of a base and is best-effort.
//!
//! Link manipulation shells out to `ip(8)` via `tokio::process`.

use crate::error::DhcpError;
use crds::InterfaceSpec;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Suffix marking sub-interfaces as managed by this agent.
///
/// Kept short so `<base>.mg.<vlan>` stays inside the 15-character kernel
/// limit for common base names.
pub const MANAGED_SUFFIX: &str = ".mg";

/// Computes the managed sub-interface name for a base interface:
/// `eth0.mg.100` for VLAN 100, `eth0.mg` for macvlan.
pub fn service_interface_name(base: &str, vlan_id: Option<i32>) -> String {
    match vlan_id {
        Some(vlan) if vlan > 0 => format!("{base}{MANAGED_SUFFIX}.{vlan}"),
        _ => format!("{base}{MANAGED_SUFFIX}"),
    }
}

async fn run_ip(args: &[&str]) -> Result<Output, DhcpError> {
    let output = Command::new("ip").args(args).output().await?;
    Ok(output)
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Creates and addresses managed sub-interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceProvisioner;

impl InterfaceProvisioner {
    async fn link_exists(&self, name: &str) -> Result<bool, DhcpError> {
        let output = run_ip(&["link", "show", "dev", name]).await?;
        Ok(output.status.success())
    }

    async fn link_up(&self, name: &str) -> Result<(), DhcpError> {
        let output = run_ip(&["link", "set", name, "up"]).await?;
        if !output.status.success() {
            return Err(DhcpError::InterfaceSetup(format!(
                "failed to bring up {name}: {}",
                stderr_of(&output)
            )));
        }
        Ok(())
    }

    /// Creates or verifies the managed sub-interface and assigns the
    /// self-IP. Returns the sub-interface name.
    pub async fn provision(&self, spec: &InterfaceSpec) -> Result<String, DhcpError> {
        let base = &spec.interface;
        if !self.link_exists(base).await? {
            return Err(DhcpError::InterfaceNotFound(base.clone()));
        }

        let name = service_interface_name(base, spec.vlan_id);

        if self.link_exists(&name).await? {
            // Already provisioned, just make sure it is up.
            debug!(interface = %name, "sub-interface already exists");
            self.link_up(&name).await?;
        } else {
            let output = match spec.vlan_id {
                Some(vlan) if vlan > 0 => {
                    info!(interface = %name, vlan, "creating VLAN sub-interface");
                    let vlan = vlan.to_string();
                    run_ip(&[
                        "link", "add", "link", base, "name", &name, "type", "vlan", "id", &vlan,
                    ])
                    .await?
                }
                _ => {
                    info!(interface = %name, "creating macvlan sub-interface");
                    run_ip(&[
                        "link", "add", "link", base, "name", &name, "type", "macvlan", "mode",
                        "bridge",
                    ])
                    .await?
                }
            };
            if !output.status.success() {
                return Err(DhcpError::InterfaceSetup(format!(
                    "failed to create {name}: {}",
                    stderr_of(&output)
                )));
            }
            self.link_up(&name).await?;
        }

        self.assign_address(&name, &spec.ipv4).await?;
        Ok(name)
    }

    /// Assigns `cidr` to the interface unless that exact address is already
    /// present.
    async fn assign_address(&self, name: &str, cidr: &str) -> Result<(), DhcpError> {
        let output = run_ip(&["-4", "addr", "show", "dev", name]).await?;
        if !output.status.success() {
            return Err(DhcpError::InterfaceNotFound(name.to_string()));
        }
        let listing = String::from_utf8_lossy(&output.stdout).into_owned();
        if listing.contains(&format!("inet {cidr} ")) {
            debug!(interface = %name, address = cidr, "address already configured");
            return Ok(());
        }

        info!(interface = %name, address = cidr, "assigning address");
        let output = run_ip(&["addr", "add", cidr, "dev", name]).await?;
        if !output.status.success() {
            return Err(DhcpError::InterfaceSetup(format!(
                "failed to assign {cidr} to {name}: {}",
                stderr_of(&output)
            )));
        }
        Ok(())
    }

    /// Removes every managed sub-interface of `base`. Individual failures
    /// are logged as warnings; cleanup is best-effort by contract.
    pub async fn cleanup(&self, base: &str) {
        let prefix = format!("{base}{MANAGED_SUFFIX}");

        let output = match run_ip(&["-o", "link", "show"]).await {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, "failed to list interfaces during cleanup");
                return;
            }
        };

        for name in managed_names(&String::from_utf8_lossy(&output.stdout), &prefix) {
            debug!(interface = %name, "removing managed sub-interface");
            match run_ip(&["link", "del", &name]).await {
                Ok(out) if !out.status.success() => {
                    warn!(interface = %name, error = %stderr_of(&out), "failed to delete sub-interface");
                }
                Err(err) => warn!(interface = %name, %err, "failed to delete sub-interface"),
                Ok(_) => {}
            }
        }
    }
}

/// Extracts the managed interface names from `ip -o link show` output.
fn managed_names(listing: &str, prefix: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            // "3: eth0.mg.100@eth0: <BROADCAST,...>"
            let name = line.split(':').nth(1)?.trim();
            let name = name.split('@').next()?;
            name.starts_with(prefix).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlan_and_macvlan_names() {
        assert_eq!(service_interface_name("eth0", Some(100)), "eth0.mg.100");
        assert_eq!(service_interface_name("eth0", Some(0)), "eth0.mg");
        assert_eq!(service_interface_name("eth0", None), "eth0.mg");
    }

    #[test]
    fn managed_names_are_filtered_from_link_listing() {
        let listing = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP
3: eth0.mg.100@eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP
4: eth0.mg@eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP
5: eth1.mg@eth1: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP
";
        assert_eq!(
            managed_names(listing, "eth0.mg"),
            vec!["eth0.mg.100", "eth0.mg"]
        );
    }
}
