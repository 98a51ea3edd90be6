//! Version resolution and download URLs
//!
//! Maps a symbolic version request ("latest" or an explicit tag) to a
//! concrete release. Explicit tags are trusted verbatim with zero network
//! calls; malformed values surface later as a download failure rather than
//! being validated here. "latest" performs a single lookup against the k0s
//! release metadata and is fatal on any failure - transient registry
//! problems are surfaced immediately instead of masked by retries.

use serde_json::Value;
use tracing::{debug, info};

use crate::platform::Arch;
use crate::{Error, Result};

/// The symbolic version that triggers a remote lookup
pub const LATEST: &str = "latest";

/// Release metadata endpoint for the newest k0s release
const LATEST_RELEASE_URL: &str = "https://api.github.com/repos/k0sproject/k0s/releases/latest";

/// What the caller asked to install. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// "latest" or an explicit release tag, trusted verbatim
    pub requested_version: String,
    /// Canonical host architecture
    pub arch: Arch,
}

/// A concrete release the installer can fetch.
///
/// Invariant: `tag` is never the literal "latest".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    /// Concrete release tag, e.g. "v1.30.0+k0s.0"
    pub tag: String,
    /// Download URL for this tag on this architecture
    pub download_url: String,
}

/// Build the download URL for a release asset.
///
/// Pure function of {tag, arch}; the asset naming scheme is
/// `k0s-<tag>-<arch>` under the tag's release downloads.
pub fn download_url(tag: &str, arch: Arch) -> String {
    format!(
        "https://github.com/k0sproject/k0s/releases/download/{tag}/k0s-{tag}-{arch}",
        tag = tag,
        arch = arch
    )
}

/// Extract the newest release tag from a release-metadata response body.
///
/// Separated from the HTTP call so tag extraction is testable without a
/// network. Returns `None` when the body has no non-empty `tag_name`.
pub fn parse_latest_tag(body: &Value) -> Option<String> {
    body.get("tag_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
}

/// Resolve an install request to a concrete release.
pub async fn resolve(request: &InstallRequest) -> Result<ResolvedRelease> {
    let tag = if request.requested_version == LATEST {
        let tag = lookup_latest_tag().await?;
        info!(tag = %tag, "Resolved 'latest' to newest release");
        tag
    } else {
        debug!(tag = %request.requested_version, "Using explicit version, no lookup");
        request.requested_version.clone()
    };

    let url = download_url(&tag, request.arch);
    Ok(ResolvedRelease {
        tag,
        download_url: url,
    })
}

/// Perform the single remote metadata lookup for the newest release tag.
async fn lookup_latest_tag() -> Result<String> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("k0sbox/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let body: Value = client
        .get(LATEST_RELEASE_URL)
        .send()
        .await
        .map_err(|e| Error::version_resolution(format!("release lookup failed: {}", e)))?
        .error_for_status()
        .map_err(|e| Error::version_resolution(format!("release lookup failed: {}", e)))?
        .json()
        .await
        .map_err(|e| Error::version_resolution(format!("unparsable release metadata: {}", e)))?;

    parse_latest_tag(&body)
        .ok_or_else(|| Error::version_resolution("release metadata has no tag_name"))
}
