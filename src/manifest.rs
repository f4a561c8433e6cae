//! Application manifest loading.
//!
//! The orchestrator only needs the main OData data source from the
//! manifest: its service `uri` and the `localUri` of the metadata document.

use crate::error::{MockServerError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Name of the data source the mock server simulates.
pub const MAIN_SERVICE: &str = "mainService";

/// Application descriptor (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "sap.app")]
    pub app: AppDescriptor,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppDescriptor {
    #[serde(rename = "dataSources", default)]
    pub data_sources: HashMap<String, DataSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSource {
    pub uri: String,
    #[serde(default)]
    pub settings: DataSourceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSourceSettings {
    #[serde(rename = "localUri")]
    pub local_uri: Option<String>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| MockServerError::ManifestInvalid(e.to_string()))
    }

    /// The `mainService` data source.
    pub fn main_service(&self) -> Result<&DataSource> {
        self.app.data_sources.get(MAIN_SERVICE).ok_or_else(|| {
            MockServerError::ManifestInvalid(format!("data source {} missing", MAIN_SERVICE))
        })
    }
}

impl DataSource {
    /// Local metadata path, relative to the application directory.
    pub fn local_uri(&self) -> Result<&str> {
        self.settings.local_uri.as_deref().ok_or_else(|| {
            MockServerError::ManifestInvalid("settings.localUri missing".to_string())
        })
    }
}

/// Source of the application manifest.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(&self) -> Result<Manifest>;
}

/// Loads the manifest from a JSON file.
#[derive(Debug, Clone)]
pub struct FileManifestLoader {
    path: PathBuf,
}

impl FileManifestLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ManifestLoader for FileManifestLoader {
    async fn load(&self) -> Result<Manifest> {
        debug!(path = %self.path.display(), "Loading manifest");
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| MockServerError::ManifestLoad {
                path: self.path.clone(),
                source,
            })?;
        Manifest::from_json(&text)
    }
}

/// Resolve the service URI against the application URL.
///
/// The result is a path with a trailing slash; scheme and authority of an
/// absolute URI are dropped since requests are matched by path.
pub fn resolve_service_root(uri: &str, app_url: &str) -> String {
    let mut uri = uri.to_string();
    if !uri.ends_with('/') {
        uri.push('/');
    }

    let joined = if let Some(rest) = uri.split_once("://").map(|(_, rest)| rest) {
        match rest.find('/') {
            Some(i) => rest[i..].to_string(),
            None => "/".to_string(),
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        let base = strip_origin(app_url);
        let dir = match base.rfind('/') {
            Some(i) => &base[..=i],
            None => "/",
        };
        format!("{}{}", dir, uri)
    };

    remove_dot_segments(&joined)
}

fn strip_origin(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => url,
    }
}

fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let parts: Vec<&str> = path.split('/').collect();
    for (i, segment) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        match *segment {
            "." => {
                if last {
                    segments.push("");
                }
            }
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
                if last {
                    segments.push("");
                }
            }
            s => segments.push(s),
        }
    }
    let joined = segments.join("/");
    if joined.starts_with('/') {
        joined
    } else {
        format!("/{}", joined)
    }
}
