//! Configuration for the OData mock server.
//!
//! Defines where the application lives, which entity sets to simulate,
//! custom fixture routes, and the init options that drive latency and
//! error simulation.

use crate::request::UriParameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Directory holding the application manifest
    #[serde(default = "default_app_path")]
    pub app_path: PathBuf,

    /// URL the application is served from; relative service URIs resolve
    /// against it
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Manifest file, relative to `app_path`
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Mock data directory, relative to `app_path`
    #[serde(default = "default_mockdata_path")]
    pub mockdata_path: String,

    /// Entity sets to simulate
    #[serde(default = "default_entity_sets")]
    pub entity_sets: Vec<String>,

    /// Generate records for entity sets without a mock data file
    #[serde(default = "default_true")]
    pub generate_missing_mock_data: bool,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Options shared by every custom route
    #[serde(default)]
    pub route_defaults: RouteOptions,

    /// Custom fixture routes, matched after the simulated entity sets
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,

    /// Service paths answered with an immediate error instead of timing out
    #[serde(default = "default_ignored_paths")]
    pub ignored_paths: Vec<String>,

    /// Register the `AlertPost` create route
    #[serde(default = "default_true")]
    pub create_route: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            app_path: default_app_path(),
            app_url: default_app_url(),
            manifest: default_manifest(),
            mockdata_path: default_mockdata_path(),
            entity_sets: default_entity_sets(),
            generate_missing_mock_data: true,
            settings: GlobalSettings::default(),
            route_defaults: RouteOptions::default(),
            routes: Vec::new(),
            ignored_paths: default_ignored_paths(),
            create_route: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_app_path() -> PathBuf {
    PathBuf::from("webapp")
}

fn default_app_url() -> String {
    "/".to_string()
}

fn default_manifest() -> String {
    "manifest.json".to_string()
}

fn default_mockdata_path() -> String {
    "localService/mockdata".to_string()
}

fn default_entity_sets() -> Vec<String> {
    vec!["AlertSet".to_string()]
}

fn default_ignored_paths() -> Vec<String> {
    vec![
        r"/sap/es/ina/GetServerInfo\?.*".to_string(),
        "/sap/opu/odata/sap/ESH_SEARCH_SRV/.*".to_string(),
    ]
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate(&self.route_defaults)
                .map_err(|e| anyhow::anyhow!("Route {}: {}", i, e))?;
        }
        for path in &self.ignored_paths {
            regex::Regex::new(path)
                .map_err(|e| anyhow::anyhow!("Invalid ignored path {}: {}", path, e))?;
        }
        if self.entity_sets.iter().any(|s| s.is_empty()) {
            anyhow::bail!("Entity set names cannot be empty");
        }
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.app_path.join(&self.manifest)
    }

    pub fn mockdata_dir(&self) -> PathBuf {
        self.app_path.join(&self.mockdata_path)
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Response delay when neither init options nor URI parameters set one
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Log every request before and after it is answered
    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Log requests no route matched
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Address the HTTP listener binds to
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            log_requests: true,
            log_unmatched: true,
            listen: default_listen(),
        }
    }
}

fn default_delay_ms() -> u64 {
    500
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

/// The `empty` flag of a route: a boolean, or `"list"` for an empty
/// result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmptyResponse {
    Flag(bool),
    Mode(String),
}

impl EmptyResponse {
    pub fn is_list(&self) -> bool {
        matches!(self, EmptyResponse::Mode(mode) if mode == "list")
    }

    pub fn is_set(&self) -> bool {
        match self {
            EmptyResponse::Flag(flag) => *flag,
            EmptyResponse::Mode(mode) => !mode.is_empty(),
        }
    }
}

/// Route options that can be given per route or shared by all routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteOptions {
    /// Sub-directory of the mock data directory, prefixed to the fixture
    /// file name as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// HTTP method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Regex matched against the URL after the service root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,

    /// Names given to the regex capture groups, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_group_names: Option<Vec<String>>,

    /// Answer with an empty response (`true`) or empty list (`"list"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty: Option<EmptyResponse>,

    /// Answer with a simulated 500
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

impl RouteOptions {
    /// Built-in defaults, the lowest precedence tier.
    pub fn builtin() -> Self {
        Self {
            method: Some("GET".to_string()),
            ..Default::default()
        }
    }

    /// Overlay `higher` on top of `self`; set fields of `higher` win.
    pub fn merge(&self, higher: &RouteOptions) -> RouteOptions {
        RouteOptions {
            base: higher.base.clone().or_else(|| self.base.clone()),
            method: higher.method.clone().or_else(|| self.method.clone()),
            regexp: higher.regexp.clone().or_else(|| self.regexp.clone()),
            matching_group_names: higher
                .matching_group_names
                .clone()
                .or_else(|| self.matching_group_names.clone()),
            empty: higher.empty.clone().or_else(|| self.empty.clone()),
            error: higher.error.or(self.error),
        }
    }
}

/// A custom route answered from a fixture file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Route name; fixture file is `<base><name>.json` and the default
    /// regex is `<name>.*`
    pub name: String,

    #[serde(flatten)]
    pub options: RouteOptions,
}

impl RouteDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: RouteOptions::default(),
        }
    }

    /// Validate the route against the shared options.
    pub fn validate(&self, shared: &RouteOptions) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Route name cannot be empty");
        }
        let resolved = ResolvedRoute::resolve(shared, self);
        if resolved.method.is_empty() || !resolved.method.chars().all(|c| c.is_ascii_alphabetic()) {
            anyhow::bail!("Invalid method: {}", resolved.method);
        }
        regex::Regex::new(&resolved.regexp)
            .map_err(|e| anyhow::anyhow!("Invalid regexp: {}", e))?;
        Ok(())
    }
}

/// How a custom route answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStrategy {
    /// 500 with `{}`
    SimulatedError,
    /// 200 with an empty result set
    EmptyList,
    /// 204 without body
    Empty,
    /// 200 with the interpolated fixture
    Fixture,
}

/// A route with every option settled.
///
/// | field                  | built-in | source                              |
/// |------------------------|----------|-------------------------------------|
/// | `method`               | `GET`    | route, else shared, else built-in   |
/// | `base`                 | `""`     | route, else shared                  |
/// | `regexp`               | `<name>.*` | route, else shared                |
/// | `matching_group_names` | none     | route, else shared                  |
/// | `strategy`             | fixture  | `error` > `empty: list` > `empty`   |
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    pub name: String,
    pub method: String,
    pub base: String,
    pub regexp: String,
    pub matching_group_names: Option<Vec<String>>,
    pub strategy: ResponseStrategy,
}

impl ResolvedRoute {
    /// Resolve built-in defaults, then shared options, then the route's own.
    pub fn resolve(shared: &RouteOptions, route: &RouteDefinition) -> Self {
        let options = RouteOptions::builtin().merge(shared).merge(&route.options);

        let strategy = if options.error.unwrap_or(false) {
            ResponseStrategy::SimulatedError
        } else {
            match &options.empty {
                Some(empty) if empty.is_list() => ResponseStrategy::EmptyList,
                Some(empty) if empty.is_set() => ResponseStrategy::Empty,
                _ => ResponseStrategy::Fixture,
            }
        };

        Self {
            name: route.name.clone(),
            method: options
                .method
                .unwrap_or_else(|| "GET".to_string())
                .to_uppercase(),
            base: options.base.unwrap_or_default(),
            regexp: options
                .regexp
                .unwrap_or_else(|| format!("{}.*", route.name)),
            matching_group_names: options.matching_group_names,
            strategy,
        }
    }

    /// Fixture file, relative to the mock data directory.
    pub fn fixture_file(&self) -> String {
        format!("{}{}.json", self.base, self.name)
    }
}

/// Options passed to `init`, falling back to launch URI parameters.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Response delay in milliseconds
    pub delay: Option<u64>,
    /// Force the metadata document to fail
    pub metadata_error: Option<bool>,
    /// Force every route to fail; `badRequest` gives 400, anything else 500
    pub error_type: Option<String>,
    /// Query parameters of the launch URL
    pub uri_parameters: UriParameters,
}

impl InitOptions {
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_metadata_error(mut self, enabled: bool) -> Self {
        self.metadata_error = Some(enabled);
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_launch_url(mut self, url: &str) -> Self {
        self.uri_parameters = UriParameters::parse(url);
        self
    }

    /// Effective delay: option, then `serverDelay`, then `default_ms`.
    pub fn delay_ms(&self, default_ms: u64) -> u64 {
        self.delay
            .or_else(|| {
                self.uri_parameters
                    .get("serverDelay")
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(default_ms)
    }

    /// Effective metadata error flag.
    pub fn metadata_error(&self) -> bool {
        self.metadata_error
            .unwrap_or_else(|| self.uri_parameters.flag("metadataError"))
    }

    /// Effective error type, if error simulation is on.
    pub fn error_type(&self) -> Option<&str> {
        self.error_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.uri_parameters.get("errorType").filter(|t| !t.is_empty()))
    }
}

/// Status code for a simulated error type.
pub fn error_status(error_type: &str) -> u16 {
    if error_type == "badRequest" {
        400
    } else {
        500
    }
}
