//! Daemon process control.
//!
//! The external dnsmasq process is driven through the [`DaemonHandle`]
//! capability: reload via SIGHUP, liveness via a zero signal, restart by
//! kill-and-respawn. The instance core only ever talks to the trait, so
//! tests can drive the whole event loop against a fake daemon without
//! spawning processes.

use crate::error::DhcpError;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// A handle on one running daemon process.
#[async_trait]
pub trait DaemonHandle: Send + Sync {
    /// Signals the daemon to re-read its configuration without restarting.
    fn reload(&mut self) -> Result<(), DhcpError>;

    /// Terminates the daemon process.
    async fn kill(&mut self) -> Result<(), DhcpError>;

    /// Probes whether the process is still running.
    fn is_alive(&mut self) -> bool;
}

/// Spawns daemon processes; the seam that lets tests substitute fakes.
#[async_trait]
pub trait DaemonLauncher: Send + Sync {
    async fn spawn(&self, config_path: &Path) -> Result<Box<dyn DaemonHandle>, DhcpError>;
}

/// Launches real `dnsmasq -C <config>` processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsmasqLauncher;

#[async_trait]
impl DaemonLauncher for DnsmasqLauncher {
    async fn spawn(&self, config_path: &Path) -> Result<Box<dyn DaemonHandle>, DhcpError> {
        let child = Command::new("dnsmasq")
            .arg("--keep-in-foreground")
            .arg("-C")
            .arg(config_path)
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| DhcpError::DaemonSpawn(err.to_string()))?;

        info!(pid = child.id(), config = %config_path.display(), "spawned dnsmasq");
        Ok(Box::new(DnsmasqHandle { child }))
    }
}

/// Handle on a spawned dnsmasq process.
pub struct DnsmasqHandle {
    child: Child,
}

impl DnsmasqHandle {
    fn pid(&self) -> Result<Pid, DhcpError> {
        let raw = self
            .child
            .id()
            .ok_or_else(|| DhcpError::DaemonSignal("process has already exited".to_string()))?;
        Ok(Pid::from_raw(raw as i32))
    }
}

#[async_trait]
impl DaemonHandle for DnsmasqHandle {
    fn reload(&mut self) -> Result<(), DhcpError> {
        let pid = self.pid()?;
        kill(pid, Signal::SIGHUP)
            .map_err(|err| DhcpError::DaemonSignal(format!("SIGHUP to {pid} failed: {err}")))?;
        info!(%pid, "reloaded dnsmasq config");
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), DhcpError> {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "failed to signal dnsmasq for termination");
        }
        self.child
            .wait()
            .await
            .map_err(|err| DhcpError::DaemonSignal(err.to_string()))?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        // try_wait returns Ok(None) while the process is still running.
        matches!(self.child.try_wait(), Ok(None))
    }
}
