//! dnsmasq config synthesis.
//!
//! The config file is rendered from a minijinja template. The template is an
//! operator customisation point: a custom file can be mounted and named in
//! [`AgentSettings::config_template`]; the embedded default covers plain
//! DHCP, PXE, and ZTP setups. Writes are atomic in the remove-then-create
//! sense: the old file is removed first so the daemon can never re-read a
//! half-written config after a SIGHUP.

use crate::error::DhcpError;
use crate::interface::service_interface_name;
use crate::types::{AgentSettings, InstancePaths};
use crds::Subnet;
use minijinja::Environment;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// Default template, used when no custom one is configured.
const DEFAULT_TEMPLATE: &str = include_str!("templates/dnsmasq.conf.j2");

/// Fields exposed to the config template.
#[derive(Debug, Serialize)]
struct TemplateData {
    interface: String,
    ip_ranges: Vec<String>,
    gateway: Option<String>,
    dns: Option<String>,
    lease_file: String,
    log_file: String,
    enable_pxe: bool,
    enable_ztp: bool,
    enable_bind_dhcp_ip: bool,
    name: String,
    self_ip: String,
    tftp_server_dir: String,
    host_ip_bindings_config_path: String,
}

/// Splits a range expression into dnsmasq `start,end` tokens.
///
/// `10.0.0.10-10.0.0.50` becomes `10.0.0.10,10.0.0.50`; a single address
/// becomes a one-address span.
pub fn split_ranges(range_expr: &str) -> Vec<String> {
    range_expr
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|token| match token.split_once('-') {
            Some((start, end)) => format!("{},{}", start.trim(), end.trim()),
            None => format!("{token},{token}"),
        })
        .collect()
}

/// Renders and writes the dnsmasq config for `subnet`.
pub struct ConfigRenderer {
    template_source: String,
}

impl ConfigRenderer {
    /// Loads the custom template if configured, otherwise the embedded one.
    pub fn new(settings: &AgentSettings) -> Result<Self, DhcpError> {
        let template_source = match &settings.config_template {
            Some(path) => fs::read_to_string(path)?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        Ok(Self { template_source })
    }

    /// Renders the config content for `subnet`.
    pub fn render(&self, subnet: &Subnet, name: &str, paths: &InstancePaths) -> Result<String, DhcpError> {
        let spec = &subnet.spec;
        let feature = spec.feature.clone().unwrap_or_default();

        let data = TemplateData {
            interface: service_interface_name(
                &spec.interface.interface,
                spec.interface.vlan_id,
            ),
            ip_ranges: split_ranges(&spec.ipv4_subnet.ip_range),
            gateway: spec.ipv4_subnet.gateway.clone(),
            dns: spec.ipv4_subnet.dns.clone(),
            lease_file: paths.lease_file.display().to_string(),
            log_file: paths.log_file.display().to_string(),
            enable_pxe: feature.enable_pxe,
            enable_ztp: feature.enable_ztp,
            enable_bind_dhcp_ip: feature.enable_bind_dhcp_ip,
            name: name.to_string(),
            self_ip: spec.interface.ipv4.clone(),
            tftp_server_dir: paths.tftp_dir.display().to_string(),
            host_ip_bindings_config_path: paths.bindings_file.display().to_string(),
        };

        let mut env = Environment::new();
        env.add_template("dnsmasq.conf", &self.template_source)?;
        let rendered = env.get_template("dnsmasq.conf")?.render(&data)?;
        debug!(subnet = name, "rendered dnsmasq config");
        Ok(rendered)
    }

    /// Renders and writes the config file for `subnet`.
    pub fn write_config(
        &self,
        subnet: &Subnet,
        name: &str,
        paths: &InstancePaths,
    ) -> Result<(), DhcpError> {
        let content = self.render(subnet, name, paths)?;
        write_atomically(&paths.config_file, &content)?;
        info!(subnet = name, path = %paths.config_file.display(), "generated dnsmasq config");
        Ok(())
    }
}

/// Remove-then-create write.
///
/// A remove failure other than "not found" is fatal; a create failure other
/// than "already exists" (possible under a concurrent retry) is fatal.
pub fn write_atomically(path: &Path, content: &str) -> Result<(), DhcpError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => {
            use std::io::Write;
            let mut file = file;
            file.write_all(content.as_bytes())?;
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{FeatureSpec, InterfaceSpec, Ipv4SubnetSpec, SubnetSpec};
    use kube::core::ObjectMeta;
    use std::path::PathBuf;

    fn subnet(pxe: bool) -> Subnet {
        Subnet {
            metadata: ObjectMeta {
                name: Some("sub1".to_string()),
                ..Default::default()
            },
            spec: SubnetSpec {
                ipv4_subnet: Ipv4SubnetSpec {
                    subnet: "10.0.0.0/24".to_string(),
                    ip_range: "10.0.0.10-10.0.0.50,10.0.0.99".to_string(),
                    gateway: Some("10.0.0.1".to_string()),
                    dns: None,
                },
                interface: InterfaceSpec {
                    interface: "eth0".to_string(),
                    vlan_id: Some(100),
                    ipv4: "10.0.0.2/24".to_string(),
                },
                feature: Some(FeatureSpec {
                    enable_bind_dhcp_ip: true,
                    enable_pxe: pxe,
                    enable_ztp: false,
                    enable_sync_endpoint: None,
                }),
            },
            status: None,
        }
    }

    fn paths(dir: &Path) -> InstancePaths {
        InstancePaths {
            config_file: dir.join("sub1.conf"),
            lease_file: dir.join("sub1.leases"),
            log_file: dir.join("sub1.log"),
            bindings_file: dir.join("sub1-bindings.conf"),
            tftp_dir: PathBuf::from("/srv/tftp"),
        }
    }

    fn renderer() -> ConfigRenderer {
        ConfigRenderer {
            template_source: DEFAULT_TEMPLATE.to_string(),
        }
    }

    #[test]
    fn splits_spans_and_singles() {
        assert_eq!(
            split_ranges("10.0.0.10-10.0.0.50,10.0.0.99"),
            vec!["10.0.0.10,10.0.0.50", "10.0.0.99,10.0.0.99"]
        );
    }

    #[test]
    fn rendered_config_names_interface_ranges_and_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = renderer()
            .render(&subnet(false), "sub1", &paths(dir.path()))
            .unwrap();

        assert!(rendered.contains("interface=eth0.mg.100"));
        assert!(rendered.contains("dhcp-range=10.0.0.10,10.0.0.50"));
        assert!(rendered.contains("dhcp-range=10.0.0.99,10.0.0.99"));
        assert!(rendered.contains("dhcp-option=3,10.0.0.1"));
        assert!(rendered.contains("sub1-bindings.conf"));
        assert!(!rendered.contains("enable-tftp"));
    }

    #[test]
    fn pxe_flag_enables_tftp_section() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = renderer()
            .render(&subnet(true), "sub1", &paths(dir.path()))
            .unwrap();
        assert!(rendered.contains("enable-tftp"));
        assert!(rendered.contains("tftp-root=/srv/tftp"));
    }

    #[test]
    fn write_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub1.conf");

        write_atomically(&path, "first\n").unwrap();
        write_atomically(&path, "second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    }
}
