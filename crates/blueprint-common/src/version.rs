//! Distribution version parsing
//!
//! k0s reports versions like `v1.30.2+k0s.0`. Comparisons use semantic
//! version precedence with the leading `v` and the build metadata dropped.

use semver::{BuildMetadata, Version};

use crate::{Error, Result};

/// Parse a distribution version, ignoring a leading `v` and any `+build` suffix.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let mut version = Version::parse(bare)
        .map_err(|e| Error::validation(format!("invalid version {:?}: {}", raw, e)))?;
    version.build = BuildMetadata::EMPTY;
    Ok(version)
}
