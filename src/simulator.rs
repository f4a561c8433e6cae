//! Built-in simulation of OData entity sets.
//!
//! Given the service metadata and the list of entity sets to serve, this
//! module loads (or generates) their records and produces the standard
//! routes: the metadata document, `$count`, read by key, list, create,
//! update and delete. These routes come first in the route table, ahead of
//! any custom route.

use crate::error::Result;
use crate::handler::{compile_relative, response_fn, MockContext, RequestHandler, ResponseFn};
use crate::metadata::{EntityType, Metadata};
use crate::mockdata::MockdataReader;
use crate::request::parse_query_string;
use crate::response::{
    respond, respond_content, respond_empty, respond_not_found, respond_odata_error,
    respond_text_error, respond_with_status,
};
use crate::store::{Entity, EntitySet, EntityStore};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Records generated for an entity set without mock data.
const GENERATED_ENTITY_COUNT: usize = 10;

/// Result of simulating the declared entity sets.
#[derive(Debug)]
pub struct Simulation {
    pub store: EntityStore,
    pub handlers: Vec<RequestHandler>,
}

/// Format an instant as an OData V2 JSON date literal.
pub fn odata_date(instant: DateTime<Utc>) -> String {
    odata_date_from_millis(instant.timestamp_millis())
}

/// Format epoch milliseconds as an OData V2 JSON date literal.
pub fn odata_date_from_millis(millis: i64) -> String {
    format!("/Date({})/", millis)
}

/// Build the entity store and built-in routes for `entity_sets`.
pub fn simulate(
    metadata: &Metadata,
    root: &str,
    mockdata: &MockdataReader,
    entity_sets: &[String],
    generate_missing: bool,
) -> Result<Simulation> {
    let mut store = EntityStore::new();
    let mut handlers = vec![metadata_handler(metadata, root)?];

    for set_name in entity_sets {
        let Some(entity_type) = metadata.entity_type_of_set(set_name) else {
            warn!(entity_set = %set_name, "Entity set not declared in metadata, skipping");
            continue;
        };

        let entities = match load_entities(mockdata, set_name) {
            Some(entities) => entities,
            None if generate_missing => {
                debug!(entity_set = %set_name, "Generating mock data");
                generate_entities(entity_type, GENERATED_ENTITY_COUNT)
            }
            None => Vec::new(),
        };
        info!(
            entity_set = %set_name,
            entities = entities.len(),
            keys = ?entity_type.keys,
            "Simulating entity set"
        );
        store.declare(
            set_name.clone(),
            EntitySet::new(entity_type.keys.clone(), entities),
        );
        handlers.extend(entity_set_handlers(set_name, root)?);
    }

    Ok(Simulation { store, handlers })
}

/// Records from `<set>.json`: a plain array, `{d: {results}}` or `{d: [..]}`.
fn load_entities(mockdata: &MockdataReader, set_name: &str) -> Option<Vec<Entity>> {
    let data = mockdata.read_json(&format!("{}.json", set_name))?;
    let records = match data {
        Value::Array(records) => records,
        Value::Object(mut envelope) => match envelope.remove("d") {
            Some(Value::Array(records)) => records,
            Some(Value::Object(mut d)) => match d.remove("results") {
                Some(Value::Array(records)) => records,
                _ => return None,
            },
            _ => return None,
        },
        _ => return None,
    };
    Some(
        records
            .into_iter()
            .filter_map(|record| match record {
                Value::Object(entity) => Some(entity),
                _ => None,
            })
            .collect(),
    )
}

/// Generate `count` records from the entity type's properties.
pub fn generate_entities(entity_type: &EntityType, count: usize) -> Vec<Entity> {
    let now = Utc::now();
    (1..=count)
        .map(|i| {
            entity_type
                .properties
                .iter()
                .map(|property| {
                    let n = i as i64;
                    let value = match property.edm_type.as_str() {
                        "Edm.Int16" | "Edm.Int32" | "Edm.Int64" | "Edm.Byte" | "Edm.SByte" => {
                            json!(n)
                        }
                        "Edm.Decimal" | "Edm.Double" | "Edm.Single" => json!(n as f64),
                        "Edm.Boolean" => json!(i % 2 == 0),
                        "Edm.DateTime" | "Edm.DateTimeOffset" => {
                            json!(odata_date(now + Duration::days(n)))
                        }
                        "Edm.Guid" => json!(format!("00000000-0000-0000-0000-{:012}", i)),
                        "Edm.Time" => json!(format!("PT{:02}H00M00S", i % 24)),
                        _ => json!(format!("{} {}", property.name, i)),
                    };
                    (property.name.clone(), value)
                })
                .collect()
        })
        .collect()
}

/// Split on `separator` outside single-quoted literals.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if ch == '\'' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&text[start..i]);
            start = i + ch.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Parse an OData literal: quoted (optionally typed, `guid'..'`), boolean,
/// null, or number with an optional type suffix.
fn parse_literal(text: &str) -> Value {
    let text = text.trim();
    if let Some(start) = text.find('\'') {
        if text.len() > start + 1 && text.ends_with('\'') {
            return Value::String(text[start + 1..text.len() - 1].replace("''", "'"));
        }
    }
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    let numeric = text.trim_end_matches(['L', 'l', 'M', 'm', 'D', 'd', 'F', 'f']);
    if let Ok(n) = numeric.parse::<i64>() {
        return Value::from(n);
    }
    numeric
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

/// Key values from a predicate like `'A1'` or `Order='O1',Line=2`, in
/// declared key order.
pub fn parse_key_predicate(predicate: &str, keys: &[String]) -> Option<Vec<Value>> {
    let parts = split_top_level(predicate, ',');
    let named: Vec<(&str, &str)> = parts
        .iter()
        .filter_map(|part| {
            let eq = part.find('=')?;
            match part.find('\'') {
                Some(quote) if quote < eq => None,
                _ => Some((part[..eq].trim(), &part[eq + 1..])),
            }
        })
        .collect();

    if named.is_empty() {
        return Some(parts.into_iter().map(parse_literal).collect());
    }
    if named.len() != parts.len() {
        return None;
    }
    keys.iter()
        .map(|key| {
            named
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, literal)| parse_literal(literal))
        })
        .collect()
}

fn key_values(ctx: &MockContext, set_name: &str, groups: &[Option<String>]) -> Option<Vec<Value>> {
    let predicate = groups.first()?.as_deref()?;
    let keys = ctx.store.entity_set_keys(set_name)?;
    parse_key_predicate(predicate, keys)
}

/// Values of the declared key fields of `entity`; `None` if one is missing.
fn key_projection(ctx: &MockContext, set_name: &str, entity: &Entity) -> Option<Vec<Value>> {
    ctx.store
        .entity_set_keys(set_name)?
        .iter()
        .map(|field| entity.get(field).cloned())
        .collect()
}

fn parse_entity(body: Option<&str>) -> Option<Entity> {
    match serde_json::from_str(body?) {
        Ok(Value::Object(entity)) => Some(entity),
        _ => None,
    }
}

fn metadata_handler(metadata: &Metadata, root: &str) -> Result<RequestHandler> {
    let document = metadata.raw().to_string();
    let path = compile_relative(root, r"\$metadata(?:[?#].*)?$", "$metadata")?;
    Ok(RequestHandler::new(
        "GET",
        path,
        response_fn(move |ctx, request, _| {
            ctx.events.fire_before(request);
            respond_content(&ctx.events, request, "application/xml", document.clone())
        }),
    ))
}

fn entity_set_handlers(set_name: &str, root: &str) -> Result<Vec<RequestHandler>> {
    let escaped = regex::escape(set_name);
    let count_path = format!(r"{}/\$count(?:\?.*)?$", escaped);
    let key_path = format!(r"{}\(([^)]*)\)(?:\?.*)?$", escaped);
    let list_path = format!(r"{}(?:\?.*)?$", escaped);

    let handler = |method: &str, pattern: &str, response: ResponseFn| -> Result<RequestHandler> {
        Ok(RequestHandler::new(
            method,
            compile_relative(root, pattern, set_name)?,
            response,
        ))
    };

    Ok(vec![
        handler("GET", &count_path, count_response(set_name))?,
        handler("GET", &key_path, read_response(set_name))?,
        handler("GET", &list_path, list_response(set_name))?,
        handler("POST", &list_path, create_response(set_name))?,
        handler("PUT", &key_path, update_response(set_name, false))?,
        handler("PATCH", &key_path, update_response(set_name, true))?,
        handler("MERGE", &key_path, update_response(set_name, true))?,
        handler("DELETE", &key_path, delete_response(set_name))?,
    ])
}

fn count_response(set_name: &str) -> ResponseFn {
    let set_name = set_name.to_string();
    response_fn(move |ctx, request, _| {
        ctx.events.fire_before(request);
        let count = ctx.store.list(&set_name, None).len();
        respond_content(&ctx.events, request, "text/plain", count.to_string())
    })
}

fn read_response(set_name: &str) -> ResponseFn {
    let set_name = set_name.to_string();
    response_fn(move |ctx, request, groups| {
        ctx.events.fire_before(request);
        let entity = key_values(ctx, &set_name, groups)
            .and_then(|keys| ctx.store.by_id(&set_name, &keys).cloned());
        match entity {
            Some(entity) => respond(&ctx.events, request, Some(&Value::Object(entity))),
            None => respond_not_found(&ctx.events, request),
        }
    })
}

fn list_response(set_name: &str) -> ResponseFn {
    let set_name = set_name.to_string();
    response_fn(move |ctx, request, _| {
        ctx.events.fire_before(request);
        // Captures are already decoded; the query string is parsed raw.
        let query = request
            .query_string()
            .map(parse_query_string)
            .unwrap_or_default();
        let skip = query.get("$skip").and_then(|v| v.parse().ok()).unwrap_or(0);
        let top = query.get("$top").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX);

        let all = ctx.store.list(&set_name, None);
        let total = all.len();
        let results: Vec<Value> = all
            .into_iter()
            .skip(skip)
            .take(top)
            .map(|entity| Value::Object(entity.clone()))
            .collect();

        let mut payload = json!({ "results": results });
        if query.get("$inlinecount").map(String::as_str) == Some("allpages") {
            payload["__count"] = json!(total.to_string());
        }
        respond(&ctx.events, request, Some(&payload))
    })
}

fn create_response(set_name: &str) -> ResponseFn {
    let set_name = set_name.to_string();
    response_fn(move |ctx, request, _| {
        ctx.events.fire_before(request);
        let Some(entity) = parse_entity(request.body.as_deref()) else {
            return respond_text_error(&ctx.events, request, 400, "Invalid entity payload");
        };
        let Some(keys) = key_projection(ctx, &set_name, &entity) else {
            return respond_odata_error(&ctx.events, request, 400, "Key property missing");
        };
        if ctx.store.by_id(&set_name, &keys).is_some() {
            return respond_odata_error(&ctx.events, request, 400, "Entity key already exists");
        }
        let created = Value::Object(entity.clone());
        if let Err(e) = ctx.store.add(&set_name, entity) {
            warn!(error = %e, "Create failed");
            return respond_not_found(&ctx.events, request);
        }
        respond_with_status(&ctx.events, request, 201, Some(&created))
    })
}

fn update_response(set_name: &str, merge: bool) -> ResponseFn {
    let set_name = set_name.to_string();
    response_fn(move |ctx, request, groups| {
        ctx.events.fire_before(request);
        let Some(payload) = parse_entity(request.body.as_deref()) else {
            return respond_text_error(&ctx.events, request, 400, "Invalid entity payload");
        };
        let Some(keys) = key_values(ctx, &set_name, groups) else {
            return respond_not_found(&ctx.events, request);
        };

        let mut entity = if merge {
            match ctx.store.by_id(&set_name, &keys) {
                Some(existing) => existing.clone(),
                None => return respond_not_found(&ctx.events, request),
            }
        } else {
            Entity::new()
        };
        entity.extend(payload);
        // The URL key wins over whatever the payload carries.
        let key_fields = ctx.store.entity_set_keys(&set_name).unwrap_or_default().to_vec();
        for (field, value) in key_fields.into_iter().zip(keys) {
            entity.insert(field, value);
        }

        if ctx.store.update(&set_name, entity) {
            respond_empty(&ctx.events, request)
        } else {
            respond_not_found(&ctx.events, request)
        }
    })
}

fn delete_response(set_name: &str) -> ResponseFn {
    let set_name = set_name.to_string();
    response_fn(move |ctx, request, groups| {
        ctx.events.fire_before(request);
        let removed = key_values(ctx, &set_name, groups)
            .and_then(|keys| ctx.store.by_id(&set_name, &keys).cloned())
            .map(|entity| ctx.store.remove(&set_name, &entity))
            .unwrap_or(false);
        if removed {
            respond_empty(&ctx.events, request)
        } else {
            respond_not_found(&ctx.events, request)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::metadata::tests::ALERT_METADATA;
    use crate::request::MockRequest;

    fn simulation(dir: &std::path::Path) -> (Vec<RequestHandler>, MockContext) {
        let metadata = Metadata::parse(ALERT_METADATA).unwrap();
        let mockdata = MockdataReader::new(dir);
        let sets = vec!["AlertSet".to_string(), "ItemSet".to_string()];
        let sim = simulate(&metadata, "/svc/", &mockdata, &sets, true).unwrap();
        (
            sim.handlers,
            MockContext {
                store: sim.store,
                mockdata,
                events: EventBus::new(),
            },
        )
    }

    fn call(
        handlers: &[RequestHandler],
        ctx: &mut MockContext,
        mut request: MockRequest,
    ) -> MockRequest {
        for handler in handlers {
            if let Some(groups) = handler.matches(&request.method, &request.url) {
                if (handler.response)(ctx, &mut request, &groups) {
                    return request;
                }
            }
        }
        panic!("No handler for {} {}", request.method, request.url);
    }

    fn write_alerts(dir: &std::path::Path) {
        std::fs::write(
            dir.join("AlertSet.json"),
            r#"{"d": {"results": [
                {"Alertguid": "A1", "Title": "First"},
                {"Alertguid": "A2", "Title": "Second"},
                {"Alertguid": "A3", "Title": "Third"}
            ]}}"#,
        )
        .unwrap();
    }

    #[test]
    fn test_metadata_route_first() {
        let dir = tempfile::tempdir().unwrap();
        let (handlers, mut ctx) = simulation(dir.path());
        assert!(handlers[0].is_metadata());

        let request = call(&handlers, &mut ctx, MockRequest::new("GET", "/svc/$metadata"));
        let response = request.response().unwrap();
        assert_eq!(response.header("Content-Type"), Some("application/xml"));
        assert!(response.body.as_deref().unwrap().contains("EntityType Name=\"Alert\""));
    }

    #[test]
    fn test_list_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        write_alerts(dir.path());
        let (handlers, mut ctx) = simulation(dir.path());

        let request = call(&handlers, &mut ctx, MockRequest::new("GET", "/svc/AlertSet"));
        let body = request.response().unwrap().json().unwrap();
        assert_eq!(body["d"]["results"].as_array().unwrap().len(), 3);

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("GET", "/svc/AlertSet?$skip=1&$top=1&$inlinecount=allpages"),
        );
        let body = request.response().unwrap().json().unwrap();
        assert_eq!(body["d"]["results"][0]["Alertguid"], "A2");
        assert_eq!(body["d"]["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["d"]["__count"], "3");

        let request = call(&handlers, &mut ctx, MockRequest::new("GET", "/svc/AlertSet/$count"));
        assert_eq!(request.response().unwrap().body.as_deref(), Some("3"));
    }

    #[test]
    fn test_read_by_key() {
        let dir = tempfile::tempdir().unwrap();
        write_alerts(dir.path());
        let (handlers, mut ctx) = simulation(dir.path());

        let request = call(&handlers, &mut ctx, MockRequest::new("GET", "/svc/AlertSet('A2')"));
        assert_eq!(request.response().unwrap().json().unwrap()["d"]["Title"], "Second");

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("GET", "/svc/AlertSet(Alertguid='A3')?$format=json"),
        );
        assert_eq!(request.response().unwrap().json().unwrap()["d"]["Title"], "Third");

        let request = call(&handlers, &mut ctx, MockRequest::new("GET", "/svc/AlertSet('Z9')"));
        assert_eq!(request.response().unwrap().status, 404);
    }

    #[test]
    fn test_create_update_delete() {
        let dir = tempfile::tempdir().unwrap();
        write_alerts(dir.path());
        let (handlers, mut ctx) = simulation(dir.path());

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("POST", "/svc/AlertSet").with_body(r#"{"Alertguid":"A4","Title":"New"}"#),
        );
        assert_eq!(request.response().unwrap().status, 201);
        assert_eq!(ctx.store.list("AlertSet", None).len(), 4);

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("MERGE", "/svc/AlertSet('A4')").with_body(r#"{"Status":"Closed"}"#),
        );
        assert_eq!(request.response().unwrap().status, 204);
        let stored = ctx.store.by_id("AlertSet", &[json!("A4")]).unwrap();
        assert_eq!(stored["Title"], "New");
        assert_eq!(stored["Status"], "Closed");

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("PUT", "/svc/AlertSet('A4')").with_body(r#"{"Title":"Replaced"}"#),
        );
        assert_eq!(request.response().unwrap().status, 204);
        let stored = ctx.store.by_id("AlertSet", &[json!("A4")]).unwrap();
        assert_eq!(stored["Title"], "Replaced");
        assert!(stored.get("Status").is_none());

        let request = call(&handlers, &mut ctx, MockRequest::new("DELETE", "/svc/AlertSet('A4')"));
        assert_eq!(request.response().unwrap().status, 204);
        assert!(ctx.store.by_id("AlertSet", &[json!("A4")]).is_none());

        let request = call(&handlers, &mut ctx, MockRequest::new("DELETE", "/svc/AlertSet('A4')"));
        assert_eq!(request.response().unwrap().status, 404);

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("POST", "/svc/AlertSet").with_body("not json"),
        );
        assert_eq!(request.response().unwrap().status, 400);
    }

    #[test]
    fn test_create_rejects_existing_or_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        write_alerts(dir.path());
        let (handlers, mut ctx) = simulation(dir.path());

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("POST", "/svc/AlertSet").with_body(r#"{"Alertguid":"A1","Title":"Dup"}"#),
        );
        let response = request.response().unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.json().unwrap()["error"]["code"], "400");
        assert_eq!(ctx.store.list("AlertSet", None).len(), 3);
        assert_eq!(ctx.store.by_id("AlertSet", &[json!("A1")]).unwrap()["Title"], "First");

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("POST", "/svc/AlertSet").with_body(r#"{"Title":"No key"}"#),
        );
        assert_eq!(request.response().unwrap().status, 400);
        assert_eq!(ctx.store.list("AlertSet", None).len(), 3);
    }

    #[test]
    fn test_list_query_decoded_once() {
        let dir = tempfile::tempdir().unwrap();
        write_alerts(dir.path());
        let (handlers, mut ctx) = simulation(dir.path());

        // `%2531` is the literal text `%31`, not a number
        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("GET", "/svc/AlertSet?$skip=%2531"),
        );
        let body = request.response().unwrap().json().unwrap();
        assert_eq!(body["d"]["results"].as_array().unwrap().len(), 3);

        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("GET", "/svc/AlertSet?$skip=1%262"),
        );
        let body = request.response().unwrap().json().unwrap();
        assert_eq!(body["d"]["results"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_generated_data_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ctx) = simulation(dir.path());
        let items = ctx.store.list("ItemSet", None);
        assert_eq!(items.len(), GENERATED_ENTITY_COUNT);
        assert_eq!(items[0]["Order"], "Order 1");
        assert_eq!(items[0]["Line"], 1);

        let alerts = ctx.store.list("AlertSet", None);
        let valid_until = alerts[0]["ValidUntil"].as_str().unwrap();
        assert!(valid_until.starts_with("/Date(") && valid_until.ends_with(")/"));
    }

    #[test]
    fn test_composite_key_read() {
        let dir = tempfile::tempdir().unwrap();
        let (handlers, mut ctx) = simulation(dir.path());
        let request = call(
            &handlers,
            &mut ctx,
            MockRequest::new("GET", "/svc/ItemSet(Line=2,Order='Order%202')"),
        );
        let body = request.response().unwrap().json().unwrap();
        assert_eq!(body["d"]["Order"], "Order 2");
    }

    #[test]
    fn test_unknown_entity_set_skipped() {
        let metadata = Metadata::parse(ALERT_METADATA).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sim = simulate(
            &metadata,
            "/svc/",
            &MockdataReader::new(dir.path()),
            &["NoSuchSet".to_string()],
            true,
        )
        .unwrap();
        assert_eq!(sim.handlers.len(), 1);
        assert_eq!(sim.store.entity_set_names().count(), 0);
    }

    #[test]
    fn test_parse_key_predicate() {
        let single = vec!["Id".to_string()];
        assert_eq!(parse_key_predicate("'A1'", &single), Some(vec![json!("A1")]));
        assert_eq!(parse_key_predicate("42", &single), Some(vec![json!(42)]));
        assert_eq!(parse_key_predicate("Id='it''s'", &single), Some(vec![json!("it's")]));
        assert_eq!(
            parse_key_predicate("guid'0000-1'", &single),
            Some(vec![json!("0000-1")])
        );

        let composite = vec!["Order".to_string(), "Line".to_string()];
        assert_eq!(
            parse_key_predicate("Line=2L,Order='O,1'", &composite),
            Some(vec![json!("O,1"), json!(2)])
        );
        assert_eq!(parse_key_predicate("Order='O1'", &composite), None);
    }

    #[test]
    fn test_odata_date() {
        assert_eq!(odata_date_from_millis(1590313600000), "/Date(1590313600000)/");
    }
}
