//! Before/after request notifications.
//!
//! Every handler fires a `Before` event when it starts answering and an
//! `After` event once the response is recorded. Listeners attached to the
//! [`EventBus`] receive both; [`RequestLog`] is the stock listener that
//! traces them.

use crate::request::{decode_component, MockRequest};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Session suffix appended to URLs by the client, stripped before
/// notifications.
const CONTEXT_ID_SUFFIX: &str = "?ContextID";

/// Lifecycle notification for one intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    Before {
        method: String,
        url: String,
        /// Query string including the leading `?`
        url_params: Option<String>,
        body: Option<String>,
    },
    After {
        method: String,
        url: String,
        status: u16,
        response_text: Option<String>,
    },
}

impl RequestEvent {
    /// Event name in `<METHOD>:before` / `<METHOD>:after` form.
    pub fn name(&self) -> String {
        match self {
            RequestEvent::Before { method, .. } => format!("{}:before", method),
            RequestEvent::After { method, .. } => format!("{}:after", method),
        }
    }
}

/// Receives request notifications.
pub trait RequestListener: Send + Sync {
    fn on_event(&self, event: &RequestEvent);
}

/// Fan-out of request notifications to attached listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn RequestListener>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, listener: Arc<dyn RequestListener>) {
        self.listeners.push(listener);
    }

    pub fn fire(&self, event: &RequestEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }

    /// Strip the session suffix from the request URL and fire `Before`.
    pub fn fire_before(&self, request: &mut MockRequest) {
        if let Some(pos) = request.url.find(CONTEXT_ID_SUFFIX) {
            request.url.truncate(pos);
        }
        let url_params = request
            .url
            .find('?')
            .map(|pos| request.url[pos..].to_string());
        self.fire(&RequestEvent::Before {
            method: request.method.clone(),
            url: request.url.clone(),
            url_params,
            body: request.body.clone(),
        });
    }

    /// Fire `After` for an answered request.
    pub fn fire_after(&self, request: &MockRequest) {
        let (status, response_text) = request
            .response()
            .map(|r| (r.status, r.body.clone()))
            .unwrap_or((0, None));
        self.fire(&RequestEvent::After {
            method: request.method.clone(),
            url: request.url.clone(),
            status,
            response_text,
        });
    }
}

/// Listener that traces every request relative to the service root.
#[derive(Debug, Clone)]
pub struct RequestLog {
    root_uri: String,
}

impl RequestLog {
    pub fn new(root_uri: impl Into<String>) -> Self {
        Self {
            root_uri: root_uri.into(),
        }
    }

    fn relative_url(&self, url: &str) -> String {
        decode_component(&url.replacen(&self.root_uri, "/", 1))
    }
}

impl RequestListener for RequestLog {
    fn on_event(&self, event: &RequestEvent) {
        match event {
            RequestEvent::Before {
                method, url, body, ..
            } => {
                info!(
                    method = %method,
                    url = %self.relative_url(url),
                    body = body.as_deref().unwrap_or(""),
                    "MockServer::before"
                );
            }
            RequestEvent::After {
                method,
                url,
                status,
                response_text,
            } => {
                info!(
                    method = %method,
                    url = %self.relative_url(url),
                    status,
                    response = response_text.as_deref().unwrap_or(""),
                    "MockServer::after"
                );
            }
        }
    }
}
