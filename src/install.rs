//! Binary download and installation
//!
//! Downloads the k0s release binary to a staging file next to the install
//! path, then persists it atomically with executable permission. Re-running
//! simply overwrites, so the installer is idempotent. Success is verified by
//! invoking the binary's own version report - a binary that downloaded but
//! does not execute cleanly fails the run.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::release::ResolvedRelease;
use crate::{cmd, Error, Result, K0S_BINARY_PATH};

/// Installs a resolved release onto the host
#[derive(Debug)]
pub struct Installer {
    release: ResolvedRelease,
    bin_path: PathBuf,
}

impl Installer {
    /// Create an installer targeting the fixed system path
    pub fn new(release: ResolvedRelease) -> Self {
        Self::with_bin_path(release, K0S_BINARY_PATH)
    }

    /// Create an installer targeting a custom path (tests)
    pub fn with_bin_path(release: ResolvedRelease, bin_path: impl Into<PathBuf>) -> Self {
        Self {
            release,
            bin_path: bin_path.into(),
        }
    }

    /// Path the binary is installed to
    pub fn bin_path(&self) -> &Path {
        &self.bin_path
    }

    /// Download, install, and verify the binary.
    ///
    /// The filesystem mutation at [`bin_path`](Self::bin_path) is exactly
    /// what the teardown engine reverses.
    pub async fn run(&self) -> Result<()> {
        info!(tag = %self.release.tag, path = %self.bin_path.display(), "Installing k0s binary");

        let staged = self.download().await?;
        self.persist(staged)?;
        self.verify().await?;

        info!(tag = %self.release.tag, "k0s binary installed and verified");
        Ok(())
    }

    /// Stream the release asset to a staging file in the install directory.
    ///
    /// Staging in the same directory keeps the final persist a same-filesystem
    /// rename, so a crashed download never leaves a half-written binary at
    /// the install path.
    async fn download(&self) -> Result<NamedTempFile> {
        let dir = self
            .bin_path
            .parent()
            .ok_or_else(|| Error::launch(format!("{} has no parent", self.bin_path.display())))?;
        std::fs::create_dir_all(dir)?;

        debug!(url = %self.release.download_url, "Downloading release asset");
        let mut response = reqwest::get(&self.release.download_url)
            .await?
            .error_for_status()?;

        let mut staged = NamedTempFile::new_in(dir)?;
        while let Some(chunk) = response.chunk().await? {
            staged.write_all(&chunk)?;
        }
        staged.flush()?;

        Ok(staged)
    }

    /// Atomically move the staged binary into place with mode 0755.
    fn persist(&self, staged: NamedTempFile) -> Result<()> {
        std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o755))?;
        staged
            .persist(&self.bin_path)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Verify the installed binary executes cleanly and reports a version.
    async fn verify(&self) -> Result<()> {
        let bin = self.bin_path.to_string_lossy();
        let output = cmd::run(&bin, &["version"])
            .await
            .map_err(|e| Error::install_verification(e.to_string()))?;

        if output.trim().is_empty() {
            return Err(Error::install_verification(format!(
                "{} version produced no output",
                bin
            )));
        }

        debug!(version = %output.trim(), "Binary version report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;
    use crate::release::download_url;

    fn sample_release() -> ResolvedRelease {
        let tag = "v1.30.0+k0s.0".to_string();
        ResolvedRelease {
            download_url: download_url(&tag, Arch::Amd64),
            tag,
        }
    }

    #[test]
    fn targets_the_fixed_system_path_by_default() {
        let installer = Installer::new(sample_release());
        assert_eq!(installer.bin_path(), Path::new(K0S_BINARY_PATH));
    }

    #[tokio::test]
    async fn verify_fails_for_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let installer =
            Installer::with_bin_path(sample_release(), dir.path().join("k0s-not-installed"));
        let err = installer.verify().await.unwrap_err();
        assert!(matches!(err, Error::InstallVerification(_)));
    }

    #[tokio::test]
    async fn verify_fails_for_silent_binary() {
        // A binary that exits 0 but prints nothing is not a working k0s.
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("k0s");
        std::fs::write(&bin, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let installer = Installer::with_bin_path(sample_release(), &bin);
        let err = installer.verify().await.unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    #[tokio::test]
    async fn verify_accepts_clean_version_report() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("k0s");
        std::fs::write(&bin, "#!/bin/sh\necho v1.30.0+k0s.0\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let installer = Installer::with_bin_path(sample_release(), &bin);
        installer.verify().await.unwrap();
    }
}
