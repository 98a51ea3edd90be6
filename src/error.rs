//! Error types for k0sbox

use std::time::Duration;

use thiserror::Error;

/// Main error type for k0sbox operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The host CPU architecture has no k0s release binary
    #[error("unsupported platform: no k0s build for machine '{machine}'")]
    UnsupportedPlatform {
        /// Raw machine string reported by the host
        machine: String,
    },

    /// The "latest" release lookup failed or returned no usable tag
    #[error("version resolution failed: {0}")]
    VersionResolution(String),

    /// The installed binary did not execute cleanly
    #[error("install verification failed: {0}")]
    InstallVerification(String),

    /// Registering, starting, or extracting credentials from the service failed
    #[error("cluster launch failed: {0}")]
    Launch(String),

    /// The cluster did not become ready within the configured timeout
    #[error("cluster not ready after {elapsed:?}, last failing check: {last_layer}")]
    ReadinessTimeout {
        /// Wall time spent polling before giving up
        elapsed: Duration,
        /// Name of the readiness layer that was still failing when time ran out
        last_layer: &'static str,
    },

    /// The DNS deep check did not confirm in-cluster name resolution
    #[error("DNS verification failed: {0}")]
    DnsVerification(String),

    /// Reading or writing the persisted phase record failed
    #[error("phase state error: {0}")]
    State(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP error from the release lookup or binary download
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a version resolution error with the given message
    pub fn version_resolution(msg: impl Into<String>) -> Self {
        Self::VersionResolution(msg.into())
    }

    /// Create an install verification error with the given message
    pub fn install_verification(msg: impl Into<String>) -> Self {
        Self::InstallVerification(msg.into())
    }

    /// Create a launch error with the given message
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a DNS verification error with the given message
    pub fn dns_verification(msg: impl Into<String>) -> Self {
        Self::DnsVerification(msg.into())
    }

    /// Create a phase state error with the given message
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_platform_names_the_machine() {
        let err = Error::UnsupportedPlatform {
            machine: "mips64".to_string(),
        };
        assert!(err.to_string().contains("mips64"));
    }

    #[test]
    fn readiness_timeout_carries_layer_and_elapsed() {
        let err = Error::ReadinessTimeout {
            elapsed: Duration::from_secs(120),
            last_layer: "NodesReady",
        };
        let msg = err.to_string();
        assert!(msg.contains("NodesReady"));
        assert!(msg.contains("120"));
    }

    #[test]
    fn helper_constructors_accept_str_and_string() {
        let err = Error::launch("k0s start exited non-zero");
        assert!(err.to_string().contains("k0s start"));

        let tag = "v1.30.0+k0s.0";
        let err = Error::version_resolution(format!("no release asset for {}", tag));
        assert!(err.to_string().contains(tag));
    }
}
