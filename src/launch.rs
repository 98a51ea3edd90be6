//! Cluster launcher
//!
//! Brings up the single-node control plane in strict order: register the
//! runtime as a background service, start it, wait for admin credentials to
//! materialize, extract them to a fixed user-scoped path, and publish that
//! path to the hosting job. Any step failing aborts the run; no inline
//! cleanup is attempted - the paired teardown is the only cleanup path and
//! tolerates partial launches.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::outputs::JobOutputs;
use crate::{cmd, Error, Result, K0S_BINARY_PATH, K0S_SERVICE_NAME};

/// Fixed wait for the service to begin materializing admin credentials.
///
/// Credential generation has no readiness signal of its own, so a short
/// settle precedes the bounded extraction poll below.
const CREDENTIAL_SETTLE: Duration = Duration::from_secs(10);

/// Upper bound on waiting for `k0s kubeconfig admin` to yield credentials
const CREDENTIAL_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between credential extraction attempts
const CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The sole long-lived artifact other components depend on.
///
/// The readiness engine reads `kubeconfig`; the teardown engine stops
/// `service`. Valid until teardown destroys the cluster.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    /// Path to the extracted admin kubeconfig
    pub kubeconfig: PathBuf,
    /// Name of the background service running the control plane
    pub service: String,
}

/// Launches the single-node control plane
#[derive(Debug)]
pub struct Launcher {
    bin: String,
    kubeconfig_path: PathBuf,
}

impl Launcher {
    /// Create a launcher using the fixed binary and credential paths
    pub fn new() -> Self {
        Self {
            bin: K0S_BINARY_PATH.to_string(),
            kubeconfig_path: default_kubeconfig_path(),
        }
    }

    /// Override binary and credential paths (tests)
    pub fn with_paths(bin: impl Into<String>, kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            kubeconfig_path: kubeconfig_path.into(),
        }
    }

    /// Bring the control plane up and publish its credentials.
    pub async fn run(&self, outputs: &JobOutputs) -> Result<ClusterHandle> {
        info!("Registering {} service for single-node operation", K0S_SERVICE_NAME);
        cmd::run(&self.bin, &["install", "controller", "--single"])
            .await
            .map_err(|e| Error::launch(e.to_string()))?;

        info!("Starting {} service", K0S_SERVICE_NAME);
        cmd::run(&self.bin, &["start"])
            .await
            .map_err(|e| Error::launch(e.to_string()))?;

        debug!(settle = ?CREDENTIAL_SETTLE, "Waiting for credentials to materialize");
        tokio::time::sleep(CREDENTIAL_SETTLE).await;

        let kubeconfig = self.wait_for_credentials().await?;
        self.write_kubeconfig(&kubeconfig)?;

        let path = self.kubeconfig_path.display().to_string();
        outputs.publish("kubeconfig", &path).await?;
        outputs.export_env("KUBECONFIG", &path).await?;
        info!(path = %path, "Admin kubeconfig extracted and published");

        Ok(ClusterHandle {
            kubeconfig: self.kubeconfig_path.clone(),
            service: K0S_SERVICE_NAME.to_string(),
        })
    }

    /// Poll `kubeconfig admin` until it yields non-empty credentials.
    ///
    /// The settle sleep alone is a known flakiness source, so extraction
    /// retries on a bounded poll rather than trusting one fixed wait.
    async fn wait_for_credentials(&self) -> Result<String> {
        let start = Instant::now();
        loop {
            match cmd::run(&self.bin, &["kubeconfig", "admin"]).await {
                Ok(output) if !output.trim().is_empty() => return Ok(output),
                Ok(_) => debug!("kubeconfig admin returned empty output, retrying"),
                Err(e) => debug!(error = %e, "kubeconfig admin not ready, retrying"),
            }

            if start.elapsed() >= CREDENTIAL_WAIT_TIMEOUT {
                return Err(Error::launch(format!(
                    "admin credentials did not materialize within {:?}",
                    CREDENTIAL_WAIT_TIMEOUT
                )));
            }
            tokio::time::sleep(CREDENTIAL_POLL_INTERVAL).await;
        }
    }

    /// Write credentials to the fixed path with restrictive permissions.
    fn write_kubeconfig(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.kubeconfig_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.kubeconfig_path, contents)?;
        std::fs::set_permissions(
            &self.kubeconfig_path,
            std::fs::Permissions::from_mode(0o600),
        )?;
        Ok(())
    }

    /// Path the admin kubeconfig is written to
    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

/// User-scoped path for the extracted admin kubeconfig
fn default_kubeconfig_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_else(|| "/root".into());
    PathBuf::from(home).join(".kube").join("k0sbox.conf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubeconfig_lands_under_home() {
        let launcher = Launcher::new();
        let path = launcher.kubeconfig_path().to_string_lossy().into_owned();
        assert!(path.ends_with(".kube/k0sbox.conf"), "got {path}");
    }

    #[test]
    fn written_kubeconfig_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Launcher::with_paths("/usr/local/bin/k0s", dir.path().join("kc"));

        launcher.write_kubeconfig("apiVersion: v1\nkind: Config\n").unwrap();

        let mode = std::fs::metadata(launcher.kubeconfig_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn write_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("nested").join("kc");
        let launcher = Launcher::with_paths("/usr/local/bin/k0s", &nested);

        launcher.write_kubeconfig("contents").unwrap();
        assert_eq!(std::fs::read_to_string(&nested).unwrap(), "contents");
    }

    #[tokio::test]
    async fn credential_wait_gives_up_on_persistent_failure() {
        // Point at a binary that cannot exist so every attempt fails; the
        // bounded poll must convert that into a launch error, not hang.
        let dir = tempfile::tempdir().unwrap();
        let launcher = Launcher::with_paths(
            dir.path().join("missing-k0s").to_string_lossy().into_owned(),
            dir.path().join("kc"),
        );

        tokio::time::pause();
        let err = launcher.wait_for_credentials().await.unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
        assert!(err.to_string().contains("did not materialize"));
    }
}
