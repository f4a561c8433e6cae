//! Response synthesis in the OData JSON envelope.
//!
//! Every function here records the response on the request and then fires
//! the `After` notification exactly once. They all return `true` so they
//! can be used directly as the result of a route handler.

use crate::events::EventBus;
use crate::request::{MockRequest, JSON_CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Content type of injected error responses.
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

fn content_type_headers(content_type: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());
    headers
}

/// JavaScript-style truthiness of an optional JSON value.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Respond 200 with `data` wrapped as `{"d": data}`.
///
/// When `data` carries both `header` and `body`, the headers are merged over
/// the JSON content type and only `body` is wrapped. A missing payload
/// produces `{}`.
pub fn respond(events: &EventBus, request: &mut MockRequest, data: Option<&Value>) -> bool {
    respond_with_status(events, request, 200, data)
}

/// Same envelope as [`respond`] with an explicit status.
pub fn respond_with_status(
    events: &EventBus,
    request: &mut MockRequest,
    status: u16,
    data: Option<&Value>,
) -> bool {
    let mut headers = content_type_headers(JSON_CONTENT_TYPE);

    let payload = match data {
        Some(Value::Object(members))
            if is_truthy(members.get("header")) && is_truthy(members.get("body")) =>
        {
            if let Some(Value::Object(extra)) = members.get("header") {
                for (name, value) in extra {
                    headers.insert(name.clone(), header_value(value));
                }
            }
            members.get("body")
        }
        other => other,
    };

    let body = match payload {
        Some(payload) => json!({ "d": payload }).to_string(),
        None => "{}".to_string(),
    };

    request.respond(status, headers, Some(body));
    events.fire_after(request);
    true
}

/// Respond 200 with an empty result set.
pub fn respond_empty_list(events: &EventBus, request: &mut MockRequest) -> bool {
    respond(events, request, Some(&json!({ "results": [] })))
}

/// Respond 204 without a body.
pub fn respond_empty(events: &EventBus, request: &mut MockRequest) -> bool {
    request.respond(204, content_type_headers(JSON_CONTENT_TYPE), None);
    events.fire_after(request);
    true
}

/// Respond 500 with an empty JSON object.
pub fn respond_simulated_error(events: &EventBus, request: &mut MockRequest) -> bool {
    request.respond(
        500,
        content_type_headers(JSON_CONTENT_TYPE),
        Some("{}".to_string()),
    );
    events.fire_after(request);
    true
}

/// Respond with a plain-text error, used by configured error injection.
pub fn respond_text_error(
    events: &EventBus,
    request: &mut MockRequest,
    status: u16,
    message: &str,
) -> bool {
    request.respond(
        status,
        content_type_headers(TEXT_CONTENT_TYPE),
        Some(message.to_string()),
    );
    events.fire_after(request);
    true
}

/// Respond with an OData error document.
pub fn respond_odata_error(
    events: &EventBus,
    request: &mut MockRequest,
    status: u16,
    message: &str,
) -> bool {
    let body = json!({
        "error": {
            "code": status.to_string(),
            "message": { "lang": "en", "value": message }
        }
    });
    request.respond(
        status,
        content_type_headers(JSON_CONTENT_TYPE),
        Some(body.to_string()),
    );
    events.fire_after(request);
    true
}

/// Respond 404 with an OData error document.
pub fn respond_not_found(events: &EventBus, request: &mut MockRequest) -> bool {
    respond_odata_error(events, request, 404, "Resource not found")
}

/// Respond 200 with a raw body of the given content type.
pub fn respond_content(
    events: &EventBus,
    request: &mut MockRequest,
    content_type: &str,
    body: String,
) -> bool {
    request.respond(200, content_type_headers(content_type), Some(body));
    events.fire_after(request);
    true
}
