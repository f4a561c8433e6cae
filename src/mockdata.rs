//! Synchronous access to the mock data directory.

use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Reads fixture files relative to the mock data base directory.
#[derive(Debug, Clone)]
pub struct MockdataReader {
    base: PathBuf,
}

impl MockdataReader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Read a text file; `None` if it cannot be read.
    pub fn read_text(&self, relative_path: &str) -> Option<String> {
        let path = self.base.join(relative_path);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Mock data file not readable");
                None
            }
        }
    }

    /// Read and parse a JSON file; `None` if missing or malformed.
    pub fn read_json(&self, relative_path: &str) -> Option<Value> {
        let content = self.read_text(relative_path)?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file = relative_path, error = %e, "Mock data file is not valid JSON");
                None
            }
        }
    }
}
