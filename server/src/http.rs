//! Route installation and the non-WebSocket request handler. Routes come
//! straight from the flavor registry: raw paths where a service asks for
//! them, `/{app}/{ver}/services{path}` for the canonical dialect, and
//! `/{app}/{ver}/api_flavors/{flavor}{path}` for everything else.

use crate::AppState;
use crate::ws;
use aog_protocol::API_VERSION;
use aog_protocol::EngineAdapter as _;
use aog_protocol::APP_NAME;
use aog_protocol::CANONICAL_FLAVOR;
use aog_protocol::HttpContent;
use aog_protocol::ServiceRequest;
use aog_protocol::TaskResult;
use aog_protocol::entity::HybridPolicy;
use aog_protocol::entity::ServiceProtocol;
use aog_protocol::result::TaskResultKind;
use axum::Router;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::MethodFilter;
use axum::routing::get;
use axum::routing::on;
use bytes::Bytes;
use http::HeaderMap;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

#[derive(Clone)]
struct RouteTarget {
    flavor: String,
    service: String,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new();
    let snapshot = state.ctx().registry.snapshot();

    for flavor in snapshot.flavors() {
        for (service_name, entry) in flavor.services() {
            let target = RouteTarget {
                flavor: flavor.name.clone(),
                service: service_name.clone(),
            };
            for endpoint in &entry.endpoints {
                let prefixed = if flavor.name == CANONICAL_FLAVOR {
                    format!("/{APP_NAME}/{API_VERSION}/services{}", endpoint.path)
                } else {
                    format!(
                        "/{APP_NAME}/{API_VERSION}/api_flavors/{}{}",
                        flavor.name, endpoint.path
                    )
                };

                if matches!(
                    entry.protocol,
                    ServiceProtocol::Websocket | ServiceProtocol::GrpcStream
                ) {
                    router = router.route(&prefixed, get(ws_handler(state.clone(), target.clone())));
                    if entry.install_raw_routes {
                        router = router
                            .route(&endpoint.path, get(ws_handler(state.clone(), target.clone())));
                    }
                    continue;
                }

                let Ok(filter) = MethodFilter::try_from(endpoint.method.clone()) else {
                    warn!(method = %endpoint.method, "unsupported route method");
                    continue;
                };
                router = router.route(
                    &prefixed,
                    on(filter, service_handler(state.clone(), target.clone())),
                );
                if entry.install_raw_routes {
                    router = router.route(
                        &endpoint.path,
                        on(filter, service_handler(state.clone(), target.clone())),
                    );
                }
            }
        }
    }

    router.route(
        &format!("/{APP_NAME}/{API_VERSION}/health"),
        get(health(state.clone())),
    )
}

fn service_handler(
    state: AppState,
    target: RouteTarget,
) -> impl Fn(
    HeaderMap,
    Bytes,
) -> std::pin::Pin<Box<dyn Future<Output = Response> + Send>>
+ Clone
+ Send
+ 'static {
    move |headers, body| {
        let state = state.clone();
        let target = target.clone();
        Box::pin(async move { handle_service(state, target, headers, body).await })
    }
}

fn ws_handler(
    state: AppState,
    target: RouteTarget,
) -> impl Fn(WebSocketUpgrade) -> std::pin::Pin<Box<dyn Future<Output = Response> + Send>>
+ Clone
+ Send
+ 'static {
    move |upgrade: WebSocketUpgrade| {
        let state = state.clone();
        let target = target.clone();
        Box::pin(async move {
            upgrade.on_upgrade(move |socket| {
                ws::handle_socket(state, target.flavor, target.service, socket)
            })
        })
    }
}

fn health(
    state: AppState,
) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Response> + Send>> + Clone + Send + 'static
{
    move || {
        let state = state.clone();
        Box::pin(async move {
            let engine_ok = match &state.ctx().engine {
                Some(engine) => engine.health_check().await.is_ok(),
                None => true,
            };
            let status = if engine_ok { "UP" } else { "DEGRADED" };
            json_response(
                StatusCode::OK,
                serde_json::json!({ "status": status }).to_string().into(),
            )
        })
    }
}

async fn handle_service(
    state: AppState,
    target: RouteTarget,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = build_service_request(&target, headers, body);
    let (task_id, mut rx) = state.scheduler.enqueue(request).await;
    debug!(task_id, flavor = %target.flavor, service = %target.service, "request accepted");

    let Some(first) = rx.recv().await else {
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("result channel closed without a result"),
        );
    };

    match first.kind {
        TaskResultKind::Done => {
            let mut builder = Response::builder().status(first.status);
            if let Some(ct) = first.content.header.get(CONTENT_TYPE) {
                builder = builder.header(CONTENT_TYPE, ct);
            } else {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder
                .body(Body::from(first.content.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        TaskResultKind::Failed => failed_response(first),
        TaskResultKind::Chunk => stream_response(first, rx),
    }
}

/// A failed task relays the upstream body when one was captured, and a
/// JSON error message otherwise.
fn failed_response(result: TaskResult) -> Response {
    if result.content.body.is_empty() {
        let message = result.error.unwrap_or_else(|| "task failed".to_string());
        return json_response(result.status, error_body(&message));
    }
    let mut builder = Response::builder().status(result.status);
    if let Some(ct) = result.content.header.get(CONTENT_TYPE) {
        builder = builder.header(CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(result.content.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Stream the remaining chunks as they arrive. If the client disconnects
/// the body stream is dropped; the runner keeps driving the upstream call
/// and its sends fail harmlessly.
fn stream_response(first: TaskResult, rx: mpsc::Receiver<TaskResult>) -> Response {
    let content_type = first
        .content
        .header
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let stream = futures::stream::unfold(
        (Some(first.content.body), rx),
        |(pending, mut rx)| async move {
            if let Some(bytes) = pending {
                return Some((Ok::<Bytes, Infallible>(bytes), (None, rx)));
            }
            loop {
                match rx.recv().await {
                    Some(result) if result.kind == TaskResultKind::Chunk => {
                        return Some((Ok(result.content.body), (None, rx)));
                    }
                    // Terminal results end the body; there is nothing
                    // useful to relay once the status line has been sent.
                    Some(_) | None => return None,
                }
            }
        },
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn build_service_request(target: &RouteTarget, headers: HeaderMap, body: Bytes) -> ServiceRequest {
    let mut request = ServiceRequest::new(target.flavor.clone(), target.service.clone())
        .with_http(HttpContent::new(headers, body));

    if !request.http.is_binary()
        && let Ok(json) = serde_json::from_slice::<serde_json::Value>(&request.http.body)
    {
        if let Some(model) = json.get("model").and_then(|v| v.as_str()) {
            request.model = Some(model.to_string());
        }
        request.ask_stream_mode = json
            .get("stream")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let Some(policy) = json.get("hybrid_policy").and_then(|v| v.as_str()) {
            request.hybrid_policy = match policy {
                "always_local" => HybridPolicy::AlwaysLocal,
                "always_remote" => HybridPolicy::AlwaysRemote,
                _ => HybridPolicy::Default,
            };
        }
    }
    request
}

fn error_body(message: &str) -> Bytes {
    serde_json::json!({ "error": { "message": message } })
        .to_string()
        .into()
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
