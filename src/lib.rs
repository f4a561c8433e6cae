//! OData Mock Server
//!
//! Simulates an OData V2 service for a web application from its manifest,
//! service metadata and mock data files. Useful for development and demos
//! without a backend.
//!
//! # Features
//!
//! - **Entity Set Simulation**: read, list, count, create, update and delete
//!   against an in-memory store seeded from mock data
//! - **Custom Routes**: answer URL patterns from fixture files with
//!   `${placeholder}` interpolation of captured groups
//! - **Latency Simulation**: fixed response delay
//! - **Failure Injection**: failing metadata document, or every route
//!   answering 400/500
//! - **Request Notifications**: before/after events for every request
//!
//! # Example Configuration
//!
//! ```yaml
//! app_path: webapp
//! entity_sets: [AlertSet]
//! routes:
//!   - name: AlertSummary
//!     regexp: "AlertSummary\\('([^']+)'\\)"
//!     matching_group_names: [id]
//!   - name: Cleanup
//!     method: POST
//!     empty: true
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod http;
pub mod interpolate;
pub mod manifest;
pub mod metadata;
pub mod mockdata;
pub mod request;
pub mod response;
pub mod server;
pub mod simulator;
pub mod store;

pub use config::{InitOptions, MockServerConfig};
pub use error::{MockServerError, Result};
pub use manifest::{FileManifestLoader, ManifestLoader};
pub use request::{MockRequest, MockResponse};
pub use server::{MockServer, ServerState};
