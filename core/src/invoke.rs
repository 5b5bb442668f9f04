//! The provider invoker: executes one upstream call over HTTP or gRPC,
//! including the polling loop for asynchronous "task" providers. Retry
//! decisions happen in the runner; this module only classifies errors.

use crate::context::GatewayContext;
use crate::error::TaskError;
use aog_api::ServiceEntry;
use aog_api::apply_auth;
use aog_client::HttpTransport as _;
use aog_client::Request;
use aog_client::Response;
use aog_client::StreamResponse;
use aog_grpc::InferenceClient;
use aog_grpc::http_body_from_response;
use aog_grpc::infer_request_from_body;
use aog_protocol::HttpContent;
use aog_protocol::ServiceTarget;
use aog_protocol::entity::ServiceProtocol;
use bytes::Bytes;
use http::HeaderValue;
use http::Method;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_MAX_ATTEMPTS: u32 = 100;
const POLL_TERMINAL_STATUSES: &[&str] = &["SUCCEEDED", "FAILED", "UNKNOWN"];
const GRPC_UNARY_TIMEOUT: Duration = Duration::from_secs(300);

pub enum InvokeOutcome {
    Unary(Response),
    Stream(StreamResponse),
}

pub async fn invoke(
    ctx: &GatewayContext,
    target: &ServiceTarget,
    entry: &ServiceEntry,
    content: &HttpContent,
    task_id: u64,
) -> Result<InvokeOutcome, TaskError> {
    match target.protocol {
        ServiceProtocol::Http => invoke_http(ctx, target, entry, content, task_id).await,
        ServiceProtocol::Grpc => {
            let response = invoke_grpc_unary(target, content, task_id).await?;
            Ok(InvokeOutcome::Unary(response))
        }
        ServiceProtocol::GrpcStream | ServiceProtocol::Websocket => Err(TaskError::Internal(
            "streaming grpc targets are driven by the websocket bridge".to_string(),
        )),
    }
}

async fn invoke_http(
    ctx: &GatewayContext,
    target: &ServiceTarget,
    entry: &ServiceEntry,
    content: &HttpContent,
    task_id: u64,
) -> Result<InvokeOutcome, TaskError> {
    let req = build_request(target, entry, content)?;

    if entry.request_segments > 1 {
        let initial = ctx
            .transport
            .execute(req)
            .await
            .map_err(TaskError::from_transport)?;
        let response = poll_async_task(ctx, target, entry, &initial, POLL_INTERVAL).await?;
        return Ok(InvokeOutcome::Unary(response));
    }

    if target.stream {
        let response = ctx
            .transport
            .stream(req)
            .await
            .map_err(TaskError::from_transport)?;
        debug!(task_id, status = %response.status, "upstream stream opened");
        Ok(InvokeOutcome::Stream(response))
    } else {
        let response = ctx
            .transport
            .execute(req)
            .await
            .map_err(TaskError::from_transport)?;
        debug!(task_id, status = %response.status, "upstream call completed");
        Ok(InvokeOutcome::Unary(response))
    }
}

/// Build the upstream request: provider method and URL, headers copied
/// minus `Content-Length`, extra headers merged, a GET body folded into
/// the query string, and authentication applied last so it can sign the
/// final shape.
fn build_request(
    target: &ServiceTarget,
    entry: &ServiceEntry,
    content: &HttpContent,
) -> Result<Request, TaskError> {
    let provider = &target.provider;
    let method = if provider.method.is_empty() {
        Method::POST
    } else {
        Method::from_bytes(provider.method.as_bytes())
            .map_err(|_| TaskError::Internal(format!("bad provider method {:?}", provider.method)))?
    };

    let mut url = provider.url.clone();
    let mut body = content.body.clone();

    if method == Method::GET && !body.is_empty() {
        url = encode_body_as_query(&url, &body)?;
        body = Bytes::new();
    }

    let mut req = Request::new(method, url);
    for (name, value) in &content.header {
        if name != &CONTENT_LENGTH {
            req.headers.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in &entry.extra_headers {
        req.headers.insert(name.clone(), value.clone());
    }
    for (name, value) in &provider.extra_headers {
        let name: http::HeaderName = name
            .parse()
            .map_err(|_| TaskError::Internal(format!("bad provider header {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TaskError::Internal("bad provider header value".to_string()))?;
        req.headers.insert(name, value);
    }

    if let Some(extra) = provider.extra_json_body.as_object()
        && !extra.is_empty()
        && let Ok(serde_json::Value::Object(mut json)) =
            serde_json::from_slice::<serde_json::Value>(&body)
    {
        for (key, value) in extra {
            json.entry(key.clone()).or_insert_with(|| value.clone());
        }
        body = Bytes::from(serde_json::Value::Object(json).to_string());
    }

    if !body.is_empty() {
        req.body = Some(body);
    }

    if provider.auth_type.requires_credentials() {
        apply_auth(provider.auth_type, &provider.auth_key, &mut req)?;
    }
    Ok(req)
}

fn encode_body_as_query(url: &str, body: &[u8]) -> Result<String, TaskError> {
    let json: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| TaskError::Validation(format!("GET body is not valid JSON: {err}")))?;
    let mut url = Url::parse(url).map_err(|err| TaskError::Internal(err.to_string()))?;
    if let Some(obj) = json.as_object() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in obj {
            match value {
                serde_json::Value::String(s) => {
                    pairs.append_pair(key, s);
                }
                other => {
                    pairs.append_pair(key, &other.to_string());
                }
            }
        }
    }
    Ok(url.to_string())
}

/// Poll `{extra_url}/{task_id}` until the task reaches a terminal status.
/// Any error during polling is fatal; running out of attempts is fatal.
async fn poll_async_task(
    ctx: &GatewayContext,
    target: &ServiceTarget,
    entry: &ServiceEntry,
    initial: &Response,
    interval: Duration,
) -> Result<Response, TaskError> {
    let json: serde_json::Value = serde_json::from_slice(&initial.body)
        .map_err(|err| TaskError::Internal(format!("async task response is not JSON: {err}")))?;
    let Some(task_id) = json
        .pointer("/output/task_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    else {
        return Err(TaskError::Internal(
            "async task response carries no task id".to_string(),
        ));
    };

    let extra_url = entry.extra_url.as_deref().ok_or_else(|| {
        TaskError::Internal("async task service has no polling url configured".to_string())
    })?;
    let poll_url = format!("{}/{task_id}", extra_url.trim_end_matches('/'));
    debug!(%poll_url, "polling async task");

    for _attempt in 0..POLL_MAX_ATTEMPTS {
        sleep(interval).await;
        let mut req = Request::new(Method::GET, poll_url.clone());
        let provider = &target.provider;
        if provider.auth_type.requires_credentials() {
            apply_auth(provider.auth_type, &provider.auth_key, &mut req)?;
        }
        // Non-success during polling is fatal, so transport errors are
        // surfaced as-is rather than reclassified as transient.
        let response = ctx.transport.execute(req).await.map_err(|err| match err {
            aog_client::TransportError::Http {
                status,
                headers,
                body,
            } => TaskError::Upstream {
                status,
                headers,
                body,
            },
            other => TaskError::Internal(other.to_string()),
        })?;

        let json: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|err| TaskError::Internal(format!("poll response is not JSON: {err}")))?;
        if let Some(status) = json.pointer("/output/task_status").and_then(|v| v.as_str())
            && POLL_TERMINAL_STATUSES.contains(&status)
        {
            return Ok(response);
        }
    }
    Err(TaskError::Internal(
        "exceeded maximum number of retries".to_string(),
    ))
}

async fn invoke_grpc_unary(
    target: &ServiceTarget,
    content: &HttpContent,
    task_id: u64,
) -> Result<Response, TaskError> {
    let mut client = InferenceClient::connect(&target.provider.url).await?;
    let request = infer_request_from_body(&target.model, &task_id.to_string(), &content.body);
    let response = client.model_infer(request, GRPC_UNARY_TIMEOUT).await?;
    let body = http_body_from_response(&response)?;

    let mut headers = http::HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(Response {
        status: http::StatusCode::OK,
        headers,
        body,
    })
}
