//! OS network configuration hooks
//!
//! The router only works once the host sends its HTTP traffic and DNS
//! queries to the local listeners. Switching that on and off is delegated to
//! a [`SystemNetwork`] implementation; [`SystemGuard`] makes sure whatever
//! was switched on is switched off again, including when the router exits
//! through an error path.

use std::net::SocketAddr;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::config::SystemConfig;
use crate::error::{Error, Result};

/// OS-level network configuration toggles
///
/// Calls are blocking. Every `set_*` has a matching `restore_*`, and
/// restoring something that was never set must be harmless.
pub trait SystemNetwork: Send + Sync {
    /// Point the system HTTP/HTTPS proxy at `addr`
    fn set_http_proxy(&self, addr: SocketAddr) -> Result<()>;

    /// Undo [`SystemNetwork::set_http_proxy`]
    fn restore_http_proxy(&self) -> Result<()>;

    /// Point the system resolver at `addr`
    fn set_dns(&self, addr: SocketAddr) -> Result<()>;

    /// Undo [`SystemNetwork::set_dns`]
    fn restore_dns(&self) -> Result<()>;
}

/// Leaves the OS alone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSystemNetwork;

impl SystemNetwork for NoopSystemNetwork {
    fn set_http_proxy(&self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn restore_http_proxy(&self) -> Result<()> {
        Ok(())
    }

    fn set_dns(&self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn restore_dns(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs the shell hooks from the `[system]` config section
///
/// The `set_*` hooks receive the listener address as their only argument.
/// Hooks that are not configured are skipped.
#[derive(Debug, Clone, Default)]
pub struct ScriptSystemNetwork {
    hooks: SystemConfig,
}

impl ScriptSystemNetwork {
    pub fn new(hooks: SystemConfig) -> Self {
        Self { hooks }
    }
}

impl SystemNetwork for ScriptSystemNetwork {
    fn set_http_proxy(&self, addr: SocketAddr) -> Result<()> {
        run_hook(self.hooks.set_http_proxy.as_deref(), Some(addr))
    }

    fn restore_http_proxy(&self) -> Result<()> {
        run_hook(self.hooks.restore_http_proxy.as_deref(), None)
    }

    fn set_dns(&self, addr: SocketAddr) -> Result<()> {
        run_hook(self.hooks.set_dns.as_deref(), Some(addr))
    }

    fn restore_dns(&self) -> Result<()> {
        run_hook(self.hooks.restore_dns.as_deref(), None)
    }
}

fn run_hook(script: Option<&str>, addr: Option<SocketAddr>) -> Result<()> {
    match script {
        Some(script) => run_script(script, addr.map(|a| a.to_string()).as_deref()),
        None => Ok(()),
    }
}

/// Run a hook script, optionally with a single argument
///
/// # Platform Behavior
///
/// - On Unix: Uses `/bin/sh -c` to execute the script
/// - On Windows: Uses `cmd /C` to execute the script
///
/// # Returns
///
/// Returns `Ok(())` if the script exits with code 0, otherwise returns an error.
pub fn run_script(script: &str, arg: Option<&str>) -> Result<()> {
    log::info!("Running script: {} {}", script, arg.unwrap_or_default());

    #[cfg(unix)]
    let command_line = match arg {
        Some(arg) => format!("{} '{}'", script, arg),
        None => script.to_string(),
    };
    #[cfg(unix)]
    let mut command = {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(command_line);
        command
    };

    #[cfg(windows)]
    let command_line = match arg {
        Some(arg) => format!("{} \"{}\"", script, arg),
        None => script.to_string(),
    };
    #[cfg(windows)]
    let mut command = {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    };

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Script(format!("failed to execute script: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        log::error!("Script failed with exit code {}: stderr={}", exit_code, stderr.trim());

        return Err(Error::Script(format!(
            "script exited with code {}: {}",
            exit_code,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        log::debug!("Script output: {}", stdout.trim());
    }

    Ok(())
}

/// Tracks which OS settings were changed and puts them back
pub struct SystemGuard {
    network: Arc<dyn SystemNetwork>,
    http_proxy: bool,
    dns: bool,
}

impl SystemGuard {
    pub fn new(network: Arc<dyn SystemNetwork>) -> Self {
        Self {
            network,
            http_proxy: false,
            dns: false,
        }
    }

    /// Point the system proxy at `addr` and remember to restore it
    pub fn enable_http_proxy(&mut self, addr: SocketAddr) -> Result<()> {
        self.network.set_http_proxy(addr)?;
        self.http_proxy = true;
        Ok(())
    }

    /// Point the system resolver at `addr` and remember to restore it
    pub fn enable_dns(&mut self, addr: SocketAddr) -> Result<()> {
        self.network.set_dns(addr)?;
        self.dns = true;
        Ok(())
    }

    /// Whether anything is waiting to be restored
    pub fn is_armed(&self) -> bool {
        self.http_proxy || self.dns
    }

    /// Undo everything enabled so far
    ///
    /// Failures are logged, not returned; each setting is restored at most once.
    pub fn restore(&mut self) {
        if std::mem::take(&mut self.dns) {
            if let Err(e) = self.network.restore_dns() {
                log::error!("Failed to restore system DNS: {}", e);
            }
        }
        if std::mem::take(&mut self.http_proxy) {
            if let Err(e) = self.network.restore_http_proxy() {
                log::error!("Failed to restore system proxy: {}", e);
            }
        }
    }
}

impl Drop for SystemGuard {
    fn drop(&mut self) {
        if self.is_armed() {
            log::warn!("Restoring system network settings on abnormal exit");
            self.restore();
        }
    }
}
