//! k0sbox - throwaway single-node k0s clusters for CI jobs
//!
//! k0sbox installs the k0s runtime on an ephemeral host, brings up a
//! single-node control plane, waits until the cluster is verifiably usable,
//! and (when cleanup is enabled) fully reverses every host mutation in a
//! paired post-job invocation.
//!
//! The two invocations share no memory: the `up` phase persists a small
//! phase record, and the `post` phase reads it to decide whether a reversal
//! is owed. Everything in between - install, launch, readiness - is common
//! to both operating modes.
//!
//! # Modules
//!
//! - [`platform`] - host architecture detection
//! - [`release`] - version resolution and download URLs
//! - [`install`] - binary download, atomic install, verification
//! - [`launch`] - service registration, startup, credential extraction
//! - [`readiness`] - layered cluster-readiness polling engine
//! - [`dnscheck`] - optional deep check: DNS resolution through the cluster
//! - [`teardown`] - best-effort reversal of all host mutations
//! - [`state`] - persisted phase record coordinating the paired invocations
//! - [`outputs`] - publication of the kubeconfig path to the hosting job
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod cmd;
pub mod dnscheck;
pub mod error;
pub mod install;
pub mod launch;
pub mod outputs;
pub mod platform;
pub mod readiness;
pub mod release;
pub mod state;
pub mod teardown;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralized so the installer, launcher, readiness engine, and teardown all
// agree on the host paths and names they share.

/// Fixed system path the k0s binary is installed to (and removed from)
pub const K0S_BINARY_PATH: &str = "/usr/local/bin/k0s";

/// Name of the service `k0s install controller` registers on the host
pub const K0S_SERVICE_NAME: &str = "k0scontroller";

/// Namespace whose workloads gate the `WorkloadsHealthy` readiness layer
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Default location of the persisted phase record
pub const DEFAULT_STATE_FILE: &str = "/run/k0sbox/state.json";
