//! Error types for the mock server.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while initializing or driving the mock server.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// The application manifest could not be read.
    #[error("Failed to load application manifest from {path}: {source}")]
    ManifestLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest was read but is not usable.
    #[error("Invalid application manifest: {0}")]
    ManifestInvalid(String),

    /// The service metadata document could not be read.
    #[error("Failed to read service metadata from {path}: {source}")]
    MetadataLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata document does not describe any entity type.
    #[error("Invalid service metadata: {0}")]
    MetadataInvalid(String),

    /// An operation referenced an entity set that is not simulated.
    #[error("Unknown entity set: {0}")]
    UnknownEntitySet(String),

    /// A route pattern failed to compile.
    #[error("Invalid route pattern for {route}: {source}")]
    InvalidRoute {
        route: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, MockServerError>;
