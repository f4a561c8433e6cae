//! HTTP transport in front of the orchestrator.
//!
//! Every request goes to a single fallback handler, which converts it into a
//! [`MockRequest`], waits the configured response delay and dispatches it
//! through the shared [`MockServer`].

use crate::request::{MockRequest, MockResponse};
use crate::server::MockServer;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Orchestrator shared between request handlers.
pub type SharedServer = Arc<Mutex<MockServer>>;

/// Router answering every path from the mock server.
pub fn router(server: SharedServer) -> Router {
    Router::new().fallback(handle_request).with_state(server)
}

/// Serve until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, server: SharedServer, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Mock server listening");
    }
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Wait for Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

async fn handle_request(
    State(server): State<SharedServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();

    let mut request = MockRequest::new(method.as_str(), url);
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.with_body(String::from_utf8_lossy(&body).into_owned());
    }

    let delay = server.lock().await.response_delay();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let (method, url) = (request.method.clone(), request.url.clone());
    match server.lock().await.handle(request) {
        Some(response) => into_http(response),
        None => {
            debug!(method = %method, url = %url, "Answering unmatched request with 404");
            not_found(&method, &url)
        }
    }
}

fn into_http(response: MockResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(response.body.unwrap_or_default()))
        .unwrap_or_else(|e| {
            error!(error = %e, "Invalid mock response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

fn not_found(method: &str, url: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": "404",
            "message": {
                "lang": "en",
                "value": format!("No mock route for {} {}", method, url)
            }
        }
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
