//! Mock server orchestrator.
//!
//! [`MockServer`] boots the simulated service: it loads the application
//! manifest, derives the metadata location and service root, simulates the
//! declared entity sets, layers error injection and custom routes on top,
//! and installs the resulting route table on the [`MockServerInstance`].

use crate::config::{error_status, InitOptions, MockServerConfig};
use crate::error::{MockServerError, Result};
use crate::events::{EventBus, RequestListener, RequestLog};
use crate::handler::{
    build_ignored_path_handler, build_request_handler, compile_relative, response_fn,
    MockContext, RequestHandler, ResponseFn,
};
use crate::manifest::{resolve_service_root, Manifest, ManifestLoader};
use crate::metadata::Metadata;
use crate::mockdata::MockdataReader;
use crate::request::{MockRequest, MockResponse};
use crate::response::{respond, respond_text_error};
use crate::simulator::{odata_date_from_millis, simulate};
use crate::store::{Entity, EntityStore};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Entity set the synthetic create route writes to.
const ALERT_ENTITY_SET: &str = "AlertSet";

/// `ValidUntil` returned by the synthetic create route, whatever was sent.
const ALERT_VALID_UNTIL_MS: i64 = 1_590_313_600_000;

const ALERT_POST_PATTERN: &str =
    r"AlertPost\?Title='([^']+)'&Description='([^']+)'&ValidUntil=datetime'([^']+)'.*";

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    LoadingManifest,
    Configuring,
    Running,
    Failed,
}

/// The simulated service: route table, entity data and timing.
#[derive(Debug)]
pub struct MockServerInstance {
    root_uri: String,
    handlers: Vec<RequestHandler>,
    context: MockContext,
    auto_respond_after: Duration,
    started: bool,
}

impl MockServerInstance {
    fn new(root_uri: String) -> Self {
        Self {
            root_uri,
            handlers: Vec::new(),
            context: MockContext {
                store: EntityStore::new(),
                mockdata: MockdataReader::new(""),
                events: EventBus::new(),
            },
            auto_respond_after: Duration::ZERO,
            started: false,
        }
    }

    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    /// Installed route table, in match order.
    pub fn requests(&self) -> &[RequestHandler] {
        &self.handlers
    }

    pub fn store(&self) -> &EntityStore {
        &self.context.store
    }

    /// Attach a listener for before/after notifications.
    pub fn attach(&mut self, listener: Arc<dyn RequestListener>) {
        self.context.events.attach(listener);
    }

    /// Delay applied before each response.
    pub fn auto_respond_after(&self) -> Duration {
        self.auto_respond_after
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn start(&mut self) {
        self.started = true;
    }

    fn stop(&mut self) {
        if self.started {
            debug!(root = %self.root_uri, "Stopping mock server instance");
        }
        self.started = false;
    }

    /// Run the first matching handler. Handlers returning `false` pass the
    /// request on to the next match.
    fn dispatch(&mut self, request: &mut MockRequest) -> bool {
        for handler in &self.handlers {
            let Some(groups) = handler.matches(&request.method, &request.url) else {
                continue;
            };
            if (handler.response)(&mut self.context, request, &groups) {
                return true;
            }
        }
        false
    }
}

/// Owns the mock server instance and drives its configuration.
#[derive(Debug)]
pub struct MockServer {
    config: MockServerConfig,
    state: ServerState,
    instance: Option<MockServerInstance>,
    /// Total requests handled.
    requests_total: AtomicU64,
    /// Requests answered by a route.
    requests_matched: AtomicU64,
    /// Requests no route answered.
    requests_unmatched: AtomicU64,
}

impl MockServer {
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            state: ServerState::Uninitialized,
            instance: None,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MockServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The current instance; `None` before the first successful configuration.
    pub fn mock_server(&self) -> Option<&MockServerInstance> {
        self.instance.as_ref()
    }

    pub fn mock_server_mut(&mut self) -> Option<&mut MockServerInstance> {
        self.instance.as_mut()
    }

    /// Delay the transport should wait before answering.
    pub fn response_delay(&self) -> Duration {
        self.instance
            .as_ref()
            .map(MockServerInstance::auto_respond_after)
            .unwrap_or_default()
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Initialize (or re-initialize) the mock server.
    ///
    /// On failure the state becomes [`ServerState::Failed`] and any previous
    /// instance is left stopped.
    pub async fn init(&mut self, loader: &dyn ManifestLoader, options: InitOptions) -> Result<()> {
        self.state = ServerState::LoadingManifest;
        let manifest = match loader.load().await {
            Ok(manifest) => manifest,
            Err(e) => return Err(self.fail(e)),
        };

        self.state = ServerState::Configuring;
        if let Err(e) = self.configure(&manifest, &options).await {
            return Err(self.fail(e));
        }

        self.state = ServerState::Running;
        Ok(())
    }

    fn fail(&mut self, e: MockServerError) -> MockServerError {
        error!(error = %e, "Mock server initialization failed");
        if let Some(instance) = self.instance.as_mut() {
            instance.stop();
        }
        self.state = ServerState::Failed;
        e
    }

    async fn configure(&mut self, manifest: &Manifest, options: &InitOptions) -> Result<()> {
        let service = manifest.main_service()?;
        let metadata_path = self.config.app_path.join(service.local_uri()?);
        let mockdata = MockdataReader::new(self.config.mockdata_dir());

        let app_url = &self.config.app_url;
        let instance = self.instance.get_or_insert_with(|| {
            MockServerInstance::new(resolve_service_root(&service.uri, app_url))
        });
        instance.stop();
        let root = instance.root_uri().to_string();

        let delay = options.delay_ms(self.config.settings.default_delay_ms);

        let raw = tokio::fs::read_to_string(&metadata_path)
            .await
            .map_err(|source| MockServerError::MetadataLoad {
                path: metadata_path.clone(),
                source,
            })?;
        let metadata = Metadata::parse(raw)?;
        metadata.sanity_check();

        let simulation = simulate(
            &metadata,
            &root,
            &mockdata,
            &self.config.entity_sets,
            self.config.generate_missing_mock_data,
        )?;
        let mut handlers = simulation.handlers;

        if options.metadata_error() {
            info!("Simulating metadata error");
            handlers = handlers
                .into_iter()
                .map(|handler| {
                    if handler.is_metadata() {
                        handler.with_response(error_response(500, "metadata Error"))
                    } else {
                        handler
                    }
                })
                .collect();
        }

        for definition in &self.config.routes {
            handlers.push(build_request_handler(
                definition,
                &self.config.route_defaults,
                &root,
            )?);
        }
        if self.config.create_route {
            handlers.push(alert_post_handler(&root)?);
        }
        for pattern in &self.config.ignored_paths {
            handlers.push(build_ignored_path_handler(pattern)?);
        }

        if let Some(error_type) = options.error_type() {
            let status = error_status(error_type);
            info!(error_type, status, "Simulating errors on every route");
            handlers = handlers
                .into_iter()
                .map(|handler| handler.with_response(error_response(status, error_type)))
                .collect();
        }

        let mut events = EventBus::new();
        if self.config.settings.log_requests {
            events.attach(Arc::new(RequestLog::new(root.clone())));
        }

        let routes = handlers.len();
        let instance = self
            .instance
            .get_or_insert_with(|| MockServerInstance::new(root.clone()));
        instance.handlers = handlers;
        instance.context = MockContext {
            store: simulation.store,
            mockdata,
            events,
        };
        instance.auto_respond_after = Duration::from_millis(delay);
        instance.start();

        info!(
            root = %root,
            routes,
            delay_ms = delay,
            entity_sets = ?self.config.entity_sets,
            "Running the app with mock data"
        );
        Ok(())
    }

    /// Dispatch a request through the route table.
    ///
    /// Returns `None` when the server is not running or no route answered.
    pub fn handle(&mut self, mut request: MockRequest) -> Option<MockResponse> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let answered = match self.instance.as_mut() {
            Some(instance) if instance.is_started() => instance.dispatch(&mut request),
            _ => false,
        };

        if answered {
            self.requests_matched.fetch_add(1, Ordering::Relaxed);
            request.into_response()
        } else {
            self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            if self.config.settings.log_unmatched {
                warn!(method = %request.method, url = %request.url, "No route matched");
            }
            None
        }
    }

    /// Stop intercepting. A later `init` re-initializes.
    pub fn shutdown(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.stop();
        }
        self.state = ServerState::Uninitialized;
        info!(
            total = self.total_requests(),
            matched = self.total_matched(),
            unmatched = self.total_unmatched(),
            "Mock server shut down"
        );
    }
}

fn error_response(status: u16, message: &str) -> ResponseFn {
    let message = message.to_string();
    response_fn(move |ctx, request, _| {
        ctx.events.fire_before(request);
        respond_text_error(&ctx.events, request, status, &message)
    })
}

/// `POST AlertPost?Title='..'&Description='..'&ValidUntil=datetime'..'`
/// creates an active alert in the alert set.
fn alert_post_handler(root: &str) -> Result<RequestHandler> {
    let path = compile_relative(root, ALERT_POST_PATTERN, "AlertPost")?;
    Ok(RequestHandler::new(
        "POST",
        path,
        response_fn(|ctx, request, groups| {
            ctx.events.fire_before(request);
            let group = |i: usize| groups.get(i).cloned().flatten().unwrap_or_default();

            let mut alert = Entity::new();
            alert.insert(
                "Alertguid".to_string(),
                json!(format!("Alert_{}", rand::thread_rng().gen_range(0..=10000))),
            );
            alert.insert("Title".to_string(), json!(group(0)));
            alert.insert("Description".to_string(), json!(group(1)));
            alert.insert(
                "ValidUntil".to_string(),
                json!(odata_date_from_millis(ALERT_VALID_UNTIL_MS)),
            );
            alert.insert("Status".to_string(), json!("Active"));

            let created = Value::Object(alert.clone());
            if let Err(e) = ctx.store.add(ALERT_ENTITY_SET, alert) {
                warn!(error = %e, "Alert not stored");
            }
            respond(&ctx.events, request, Some(&created))
        }),
    ))
}
