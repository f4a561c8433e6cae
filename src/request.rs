//! Request and response handles passed through the route table.

use std::collections::HashMap;
use tracing::warn;

/// Default content type for synthesized JSON responses.
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// An intercepted request.
///
/// Handlers answer it with [`MockRequest::respond`]; the first response
/// sticks.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    /// HTTP method, upper-case
    pub method: String,
    /// Path and query string as received
    pub url: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body, if any
    pub body: Option<String>,
    response: Option<MockResponse>,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Query string part of the URL, without the `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, query)| query)
    }

    /// Record the response for this request.
    pub fn respond(&mut self, status: u16, headers: HashMap<String, String>, body: Option<String>) {
        if self.response.is_some() {
            warn!(method = %self.method, url = %self.url, "Request already answered, ignoring second response");
            return;
        }
        self.response = Some(MockResponse {
            status,
            headers,
            body,
        });
    }

    pub fn response(&self) -> Option<&MockResponse> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<MockResponse> {
        self.response
    }
}

/// A synthesized response.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl MockResponse {
    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

/// Query parameters of the URL the mock server was launched from.
///
/// These act as the lowest-precedence source of init options
/// (`serverDelay`, `metadataError`, `errorType`).
#[derive(Debug, Clone, Default)]
pub struct UriParameters {
    params: HashMap<String, String>,
}

impl UriParameters {
    /// Parse the query string of a full or partial URL.
    pub fn parse(url: &str) -> Self {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        let query = query.split('#').next().unwrap_or("");
        Self {
            params: parse_query_string(query),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Whether a flag parameter is set to something other than empty,
    /// `false` or `0`.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(v) if !v.is_empty() && v != "false" && v != "0")
    }
}

/// Parse a query string into key-value pairs; the first value of a key wins.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params
            .entry(decode_component(key))
            .or_insert_with(|| decode_component(value));
    }

    params
}

/// Percent-decode a URL component, leaving it unchanged when invalid.
pub fn decode_component(s: &str) -> String {
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| s.to_string())
}
