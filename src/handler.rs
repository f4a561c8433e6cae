//! Request handlers and the builder for custom fixture routes.
//!
//! A [`RequestHandler`] pairs a method and a URL regex with a response
//! function. The route table is an ordered list of handlers; the first one
//! whose method and regex match answers the request.

use crate::config::{ResolvedRoute, ResponseStrategy, RouteDefinition, RouteOptions};
use crate::error::{MockServerError, Result};
use crate::events::EventBus;
use crate::interpolate::{interpolate, Dictionary};
use crate::mockdata::MockdataReader;
use crate::request::{decode_component, MockRequest};
use crate::response::{respond, respond_empty, respond_empty_list, respond_simulated_error};
use crate::store::EntityStore;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Mutable state handlers work against.
#[derive(Debug)]
pub struct MockContext {
    pub store: EntityStore,
    pub mockdata: MockdataReader,
    pub events: EventBus,
}

/// Response function of a handler: context, request, captured groups.
///
/// Returns `true` when the request was answered.
pub type ResponseFn =
    Arc<dyn Fn(&mut MockContext, &mut MockRequest, &[Option<String>]) -> bool + Send + Sync>;

/// Wrap a closure as a [`ResponseFn`].
pub fn response_fn<F>(f: F) -> ResponseFn
where
    F: Fn(&mut MockContext, &mut MockRequest, &[Option<String>]) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One entry of the route table.
#[derive(Clone)]
pub struct RequestHandler {
    pub method: String,
    pub path: Regex,
    pub response: ResponseFn,
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("method", &self.method)
            .field("path", &self.path.as_str())
            .finish()
    }
}

impl RequestHandler {
    pub fn new(method: impl Into<String>, path: Regex, response: ResponseFn) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path,
            response,
        }
    }

    /// Match a request, returning the percent-decoded capture groups.
    pub fn matches(&self, method: &str, url: &str) -> Option<Vec<Option<String>>> {
        if !self.method.eq_ignore_ascii_case(method) {
            return None;
        }
        let captures = self.path.captures(url)?;
        Some(
            captures
                .iter()
                .skip(1)
                .map(|group| group.map(|m| decode_component(m.as_str())))
                .collect(),
        )
    }

    /// Whether the pattern targets the metadata document.
    pub fn is_metadata(&self) -> bool {
        self.path.as_str().contains("$metadata")
    }

    /// Replace the response function, keeping method and pattern.
    pub fn with_response(mut self, response: ResponseFn) -> Self {
        self.response = response;
        self
    }
}

/// Compile a route regex relative to the service root.
pub fn compile_relative(root: &str, pattern: &str, route: &str) -> Result<Regex> {
    Regex::new(&format!("^{}(?:{})", regex::escape(root), pattern)).map_err(|source| {
        MockServerError::InvalidRoute {
            route: route.to_string(),
            source,
        }
    })
}

/// Zip group names with captured values; missing groups are left out.
fn dictionary(names: &[String], groups: &[Option<String>]) -> Dictionary {
    names
        .iter()
        .zip(groups.iter())
        .filter_map(|(name, value)| value.as_ref().map(|v| (name.clone(), v.clone())))
        .collect()
}

fn fixture_response(route: &ResolvedRoute) -> ResponseFn {
    let file = route.fixture_file();
    let group_names = route.matching_group_names.clone();
    response_fn(move |ctx, request, groups| {
        let mut data = ctx.mockdata.read_json(&file);
        if let (Some(data), Some(names)) = (data.as_mut(), group_names.as_ref()) {
            interpolate(data, &dictionary(names, groups));
        }
        respond(&ctx.events, request, data.as_ref())
    })
}

/// Build a handler for a custom route.
///
/// Options resolve as built-in defaults, then `shared`, then the route's
/// own. The response always fires the `Before` notification first.
pub fn build_request_handler(
    definition: &RouteDefinition,
    shared: &RouteOptions,
    root: &str,
) -> Result<RequestHandler> {
    let route = ResolvedRoute::resolve(shared, definition);
    let path = compile_relative(root, &route.regexp, &route.name)?;

    let strategy: ResponseFn = match route.strategy {
        ResponseStrategy::SimulatedError => {
            response_fn(|ctx, request, _| respond_simulated_error(&ctx.events, request))
        }
        ResponseStrategy::EmptyList => {
            response_fn(|ctx, request, _| respond_empty_list(&ctx.events, request))
        }
        ResponseStrategy::Empty => response_fn(|ctx, request, _| respond_empty(&ctx.events, request)),
        ResponseStrategy::Fixture => fixture_response(&route),
    };

    let response = response_fn(move |ctx, request, groups| {
        ctx.events.fire_before(request);
        strategy(ctx, request, groups)
    });

    Ok(RequestHandler::new(route.method, path, response))
}

/// Build a GET handler answering an absolute path pattern with a 500.
pub fn build_ignored_path_handler(pattern: &str) -> Result<RequestHandler> {
    let path = Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
        MockServerError::InvalidRoute {
            route: pattern.to_string(),
            source,
        }
    })?;
    Ok(RequestHandler::new(
        "GET",
        path,
        response_fn(|ctx, request, _| respond_simulated_error(&ctx.events, request)),
    ))
}
