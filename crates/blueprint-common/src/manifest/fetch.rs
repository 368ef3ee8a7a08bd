//! Manifest retrieval from local paths and HTTP(S) URLs

use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Prefix marking an explicit local path (used for rewritten temp manifests)
pub const FILE_URI_PREFIX: &str = "file://";

/// Where a manifest URI points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource<'a> {
    /// `http://` or `https://` URL
    Remote(&'a str),
    /// Local filesystem path, `file://` already stripped
    Local(&'a Path),
}

impl<'a> ManifestSource<'a> {
    /// Classify a manifest URI
    pub fn parse(uri: &'a str) -> Self {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            Self::Remote(uri)
        } else {
            Self::Local(Path::new(uri.strip_prefix(FILE_URI_PREFIX).unwrap_or(uri)))
        }
    }
}

/// Read the raw manifest text behind `uri`
pub async fn fetch_manifest(uri: &str) -> Result<String> {
    match ManifestSource::parse(uri) {
        ManifestSource::Remote(url) => fetch_remote(url).await,
        ManifestSource::Local(path) => {
            debug!(path = %path.display(), "reading local manifest");
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::fetch(uri, e.to_string()))
        }
    }
}

async fn fetch_remote(url: &str) -> Result<String> {
    debug!(url = %url, "downloading manifest");
    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::fetch(url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::fetch(url, format!("unexpected HTTP status {}", status)));
    }

    response
        .text()
        .await
        .map_err(|e| Error::fetch(url, format!("failed to read body: {}", e)))
}
