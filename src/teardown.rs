//! Reversal of all host mutations
//!
//! Invoked with no memory of what the paired setup actually did: everything
//! is rediscovered from host state. If the runtime binary is absent there is
//! nothing to reverse and the engine returns immediately with zero mutating
//! calls. Otherwise every step runs even when an earlier one failed, and
//! every failure is downgraded to a warning - a cleanup phase that can fail
//! the job, or skip later steps because an earlier one errored, would defeat
//! its purpose on a long-lived host.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::cmd::{self, CommandError};
use crate::{K0S_BINARY_PATH, K0S_SERVICE_NAME};

/// Auxiliary directories the network plugin leaves behind; `reset` does not
/// always remove these on older releases.
const CNI_DIRS: &[&str] = &["/etc/cni/net.d", "/run/k0s"];

/// Host mutations the teardown engine performs, one method per step.
///
/// A seam so step ordering and keep-going-on-failure are testable without
/// touching a real host.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostOps: Send + Sync {
    /// Whether the runtime binary is installed at all
    fn binary_present(&self) -> bool;
    /// Stop the background service
    async fn stop_service(&self) -> Result<(), CommandError>;
    /// Invoke the runtime's own full reset: service registration, on-disk
    /// state, configuration, and firewall mutations
    async fn reset_runtime(&self) -> Result<(), CommandError>;
    /// Remove the installed binary
    fn remove_binary(&self) -> std::io::Result<()>;
    /// Remove auxiliary network-plugin directories
    fn remove_cni_dirs(&self) -> std::io::Result<()>;
}

/// What a teardown run did, and what it could not do
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Steps that failed, rendered for logging. Never fatal.
    pub warnings: Vec<String>,
}

impl TeardownReport {
    /// Whether every attempted step succeeded
    pub fn clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Reverse all host mutations, best-effort.
///
/// Always returns a report, never an error: the aggregate outcome of
/// cleanup must not fail the surrounding job.
pub async fn run(host: &dyn HostOps) -> TeardownReport {
    let mut report = TeardownReport::default();

    if !host.binary_present() {
        info!("k0s binary not present, nothing to reverse");
        return report;
    }

    info!("Stopping {} service", K0S_SERVICE_NAME);
    if let Err(e) = host.stop_service().await {
        note(&mut report, "stop service", e.to_string());
    }

    info!("Resetting k0s state");
    if let Err(e) = host.reset_runtime().await {
        note(&mut report, "reset runtime", e.to_string());
    }

    info!("Removing k0s binary");
    if let Err(e) = host.remove_binary() {
        note(&mut report, "remove binary", e.to_string());
    }

    info!("Removing network plugin directories");
    if let Err(e) = host.remove_cni_dirs() {
        note(&mut report, "remove CNI directories", e.to_string());
    }

    if report.clean() {
        info!("All host mutations reversed");
    } else {
        warn!(
            warnings = report.warnings.len(),
            "Teardown finished with warnings"
        );
    }
    report
}

fn note(report: &mut TeardownReport, step: &str, detail: String) {
    warn!(step, detail = %detail, "Cleanup step failed, continuing");
    report.warnings.push(format!("{}: {}", step, detail));
}

/// Production host operations against the real binary and filesystem
pub struct K0sHost {
    bin: PathBuf,
    cni_dirs: Vec<PathBuf>,
}

impl K0sHost {
    /// Operate on the fixed system paths
    pub fn new() -> Self {
        Self::with_paths(K0S_BINARY_PATH, CNI_DIRS.iter().map(PathBuf::from).collect())
    }

    /// Operate on custom paths (tests)
    pub fn with_paths(bin: impl Into<PathBuf>, cni_dirs: Vec<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            cni_dirs,
        }
    }

    fn bin(&self) -> String {
        self.bin.to_string_lossy().into_owned()
    }
}

impl Default for K0sHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostOps for K0sHost {
    fn binary_present(&self) -> bool {
        self.bin.exists()
    }

    async fn stop_service(&self) -> Result<(), CommandError> {
        cmd::run(&self.bin(), &["stop"]).await.map(|_| ())
    }

    async fn reset_runtime(&self) -> Result<(), CommandError> {
        cmd::run(&self.bin(), &["reset"]).await.map(|_| ())
    }

    fn remove_binary(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.bin) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn remove_cni_dirs(&self) -> std::io::Result<()> {
        for dir in &self.cni_dirs {
            match std::fs::remove_dir_all(dir) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}
