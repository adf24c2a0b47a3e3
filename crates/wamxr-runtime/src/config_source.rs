//! Kind descriptor lookup.
//!
//! The config service answers `GET {base}/wamsConfig/{kind}.json` with
//! `{ name, wam3d }` and `GET {base}/wamsConfig/` with the list of kind names.
//! A missing descriptor (any non-2xx answer) means the kind does not exist;
//! it is reported as `Ok(None)`, not as an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Descriptor served for one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WamConfig {
    pub name: String,
    /// Plugin init descriptor; may embed a `generator`
    pub wam3d: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed descriptor: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Descriptor for `kind`, `None` when the kind does not exist
    async fn fetch(&self, kind: &str) -> Result<Option<WamConfig>, ConfigError>;

    /// Every kind name the source knows
    async fn list(&self) -> Result<Vec<String>, ConfigError>;
}

/// Kind names end up in URLs and file paths
fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Config service reached over HTTP
pub struct HttpConfigSource {
    client: reqwest::Client,
    base: String,
}

impl HttpConfigSource {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn descriptor_url(&self, kind: &str) -> String {
        format!("{}/wamsConfig/{}.json", self.base, kind)
    }

    pub fn listing_url(&self) -> String {
        format!("{}/wamsConfig/", self.base)
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self, kind: &str) -> Result<Option<WamConfig>, ConfigError> {
        if !is_valid_kind(kind) {
            return Ok(None);
        }
        let url = self.descriptor_url(kind);
        tracing::debug!("Fetching {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            tracing::debug!("{} answered {}", url, response.status());
            return Ok(None);
        }
        Ok(Some(response.json::<WamConfig>().await?))
    }

    async fn list(&self) -> Result<Vec<String>, ConfigError> {
        let response = self.client.get(self.listing_url()).send().await?;
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        Ok(response.json::<Vec<String>>().await?)
    }
}

/// Directory of `{kind}.json` files, as served by the dev server
pub struct DirConfigSource {
    dir: PathBuf,
}

impl DirConfigSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ConfigSource for DirConfigSource {
    async fn fetch(&self, kind: &str) -> Result<Option<WamConfig>, ConfigError> {
        if !is_valid_kind(kind) {
            return Ok(None);
        }
        let path = self.dir.join(format!("{kind}.json"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, ConfigError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut kinds = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(kind) = name.strip_suffix(".json") {
                kinds.push(kind.to_string());
            }
        }
        kinds.sort();
        Ok(kinds)
    }
}
