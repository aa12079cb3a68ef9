//! The HTTP reverse proxy.
//!
//! Requests are classified by their `Host` header against the configured
//! base domain:
//! - `<alias>.<base-domain>` — alias lookup (falls back to treating the
//!   label as an application ID when no alias matches)
//! - `<task>.<app>.<base-domain>` — explicit task addressing
//!
//! The selected target receives the request at `http://<ip>:<port>`.
//! Upstream failures map to 502; target absence maps to 503.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderMap, HeaderName, HOST};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use osprey_events::Target;
use osprey_id::{AppId, TaskId};
use tracing::{debug, warn};

use crate::upstream::UpstreamRegistry;

/// Headers that must not cross a proxy hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailers"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
];

/// Shared proxy state.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<UpstreamRegistry>,
    pub base_domain: String,
    pub client: reqwest::Client,
}

impl ProxyState {
    pub fn new(registry: Arc<UpstreamRegistry>, base_domain: impl Into<String>) -> Self {
        Self {
            registry,
            base_domain: base_domain.into().to_ascii_lowercase(),
            client: reqwest::Client::new(),
        }
    }
}

/// Builds the proxy router; every path and method is proxied.
pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(proxy).with_state(state)
}

/// How a Host header addresses an upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostRoute {
    Alias(String),
    Task { app: String, task: String },
}

/// Classifies a Host header against the base domain.
fn classify(host: &str, base_domain: &str) -> Option<HostRoute> {
    let host = host.split(':').next().unwrap_or(host);
    let host = host.to_ascii_lowercase();
    let host = host.trim_end_matches('.');

    let prefix = host
        .strip_suffix(base_domain)
        .and_then(|p| p.strip_suffix('.'))?;

    let labels: Vec<&str> = prefix.split('.').collect();
    match labels[..] {
        [alias] if !alias.is_empty() => Some(HostRoute::Alias(alias.to_string())),
        [task, app] if !task.is_empty() && !app.is_empty() => Some(HostRoute::Task {
            app: app.to_string(),
            task: task.to_string(),
        }),
        _ => None,
    }
}

/// Client IP: first X-Forwarded-For entry, else the socket peer.
fn remote_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

async fn resolve(state: &ProxyState, route: HostRoute, remote: IpAddr) -> Option<Target> {
    match route {
        HostRoute::Alias(label) => {
            if let Some(target) = state.registry.lookup_alias(remote, &label).await {
                return Some(target);
            }
            // Not an alias; the label may be a bare application ID.
            let app_id: AppId = label.parse().ok()?;
            state.registry.lookup(remote, &app_id, None).await
        }
        HostRoute::Task { app, task } => {
            let app_id: AppId = app.parse().ok()?;
            let task_id: TaskId = task.parse().ok()?;
            state.registry.lookup(remote, &app_id, Some(&task_id)).await
        }
    }
}

async fn proxy(
    State(state): State<ProxyState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let Some(host) = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };

    let Some(route) = classify(&host, &state.base_domain) else {
        debug!(host = %host, "host not under base domain");
        return (StatusCode::NOT_FOUND, "no application for host").into_response();
    };

    let remote = remote_ip(req.headers(), peer);
    let Some(target) = resolve(&state, route, remote).await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no healthy target").into_response();
    };

    forward(&state, req, &target).await
}

async fn forward(state: &ProxyState, req: Request, target: &Target) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", target.url(), path_and_query);
    let method = req.method().clone();

    let mut headers = HeaderMap::new();
    for (name, value) in req.headers() {
        if *name == HOST || HOP_BY_HOP.contains(name) {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    let body = reqwest::Body::wrap_stream(req.into_body().into_data_stream());

    let upstream = state
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(response) => {
            let mut builder = Response::builder().status(response.status());
            for (name, value) in response.headers() {
                if HOP_BY_HOP.contains(name) {
                    continue;
                }
                builder = builder.header(name.clone(), value.clone());
            }
            builder
                .body(Body::from_stream(response.bytes_stream()))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(err) => {
            warn!(
                task_id = %target.task_id,
                url = %url,
                error = %err,
                "upstream request failed"
            );
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}
