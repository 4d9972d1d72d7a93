//! Subnet Controller
//!
//! Node agent that turns `Subnet` and `BindingIp` resources into running
//! per-subnet dnsmasq instances: one managed sub-interface, one generated
//! config, one daemon process per subnet, with lease observation and
//! manual IP/MAC bindings fed back into subnet status.

mod bindingip;
mod cache;
mod config;
mod controller;
mod error;
mod fleet;
mod registry;
mod watcher;

use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting subnet controller");

    let settings = config::settings_from_env()?;
    info!("Configuration:");
    info!("  Node: {}", settings.node_name);
    info!("  Config dir: {}", settings.config_dir.display());
    info!("  Lease dir: {}", settings.lease_dir.display());
    info!("  Log dir: {}", settings.log_dir.display());

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
