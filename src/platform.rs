//! Host architecture detection
//!
//! Maps the raw machine string reported by the host to the canonical
//! identifier k0s release assets are published under. Table-driven so a new
//! architecture is a one-line change.

use std::fmt;

use crate::{cmd, Error, Result};

/// Canonical architecture identifier used in k0s release asset names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 64-bit x86 (x86_64)
    Amd64,
    /// 64-bit ARM (aarch64)
    Arm64,
    /// 32-bit ARM (armv7 and friends)
    Arm,
}

/// Mapping from raw `uname -m` output to canonical identifiers.
const MACHINE_TABLE: &[(&str, Arch)] = &[
    ("x86_64", Arch::Amd64),
    ("amd64", Arch::Amd64),
    ("aarch64", Arch::Arm64),
    ("arm64", Arch::Arm64),
    ("armv7l", Arch::Arm),
    ("armv8l", Arch::Arm),
    ("arm", Arch::Arm),
];

impl Arch {
    /// Resolve a raw machine string to a canonical architecture.
    ///
    /// Anything not in the table is fatal: there is no k0s binary to fetch,
    /// so the whole pipeline halts before any host mutation.
    pub fn from_machine(raw: &str) -> Result<Self> {
        let machine = raw.trim();
        MACHINE_TABLE
            .iter()
            .find(|(name, _)| machine.eq_ignore_ascii_case(name))
            .map(|(_, arch)| *arch)
            .ok_or_else(|| Error::UnsupportedPlatform {
                machine: machine.to_string(),
            })
    }

    /// Detect the architecture of the current host via `uname -m`.
    pub async fn detect() -> Result<Self> {
        let machine = cmd::run("uname", &["-m"])
            .await
            .map_err(|e| Error::UnsupportedPlatform {
                machine: format!("<unknown: {}>", e),
            })?;
        Self::from_machine(&machine)
    }

    /// Canonical identifier as it appears in release asset names
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
