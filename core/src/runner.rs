//! The per-task runner: middleware, request conversion, invocation with
//! bounded retries, and response handling. Each stage is timed; the model
//! token is held for the whole run and released on every exit path.

use crate::context::GatewayContext;
use crate::context::StreamBridge as _;
use crate::error::TaskError;
use crate::invoke::InvokeOutcome;
use crate::invoke::invoke;
use crate::middleware;
use crate::model_gate::requires_exclusive;
use crate::schedule::Scheduler;
use aog_api::ConvertContext;
use aog_api::ConvertOutcome;
use aog_api::Direction;
use aog_api::RegistrySnapshot;
use aog_api::StreamMode;
use aog_api::chunk_stream;
use aog_api::detect_stream_mode;
use aog_api::wrap_chunk;
use aog_api::wrap_line;
use aog_client::StreamResponse;
use aog_protocol::HttpContent;
use aog_protocol::ServiceRequest;
use aog_protocol::ServiceTarget;
use aog_protocol::TaskResult;
use aog_protocol::entity::Location;
use aog_protocol::entity::ServiceProtocol;
use aog_protocol::ws::WsTaskKind;
use futures::StreamExt;
use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

pub(crate) async fn run_task(
    sched: Scheduler,
    id: u64,
    mut request: ServiceRequest,
    target: ServiceTarget,
    tx_result: mpsc::Sender<TaskResult>,
) {
    let ctx = sched.ctx().clone();
    match drive(&ctx, id, &mut request, &target, &tx_result).await {
        Ok(()) => sched.notify_done(id).await,
        Err(err) => {
            let message = err.to_string();
            let result = failed_result(id, err);
            let _ = tx_result.send(result).await;
            sched.notify_failed(id, message).await;
        }
    }
}

/// Upstream-fatal errors relay the upstream status and body verbatim;
/// everything else maps through `TaskError::status_code`.
fn failed_result(id: u64, err: TaskError) -> TaskResult {
    match err {
        TaskError::Upstream {
            status,
            headers,
            body,
        } => {
            let mut result = TaskResult::failed(id, status, "upstream error");
            result.content = HttpContent::new(headers, body);
            result
        }
        err => TaskResult::failed(id, err.status_code(), err.to_string()),
    }
}

async fn drive(
    ctx: &GatewayContext,
    id: u64,
    request: &mut ServiceRequest,
    target: &ServiceTarget,
    tx_result: &mpsc::Sender<TaskResult>,
) -> Result<(), TaskError> {
    let exclusive = target.location == Location::Local && requires_exclusive(&request.service);
    let _token = ctx.model_gates.acquire(&target.model, exclusive).await;

    let stage = Instant::now();
    middleware::run(ctx, id, request, target).await?;
    debug!(task_id = id, elapsed_ms = stage.elapsed().as_millis() as u64, "middleware done");

    // WebSocket streaming tasks hand off to the bridge after middleware;
    // their results flow over the socket, not the result channel.
    if target.protocol == ServiceProtocol::GrpcStream && request.ws_conn_id.is_some() {
        return dispatch_to_bridge(ctx, id, request, target, tx_result).await;
    }

    let convert_ctx = ConvertContext::new()
        .with("model", target.model.clone())
        .with("stream", target.stream)
        .with("id", id.to_string());
    let snapshot = ctx.registry.snapshot();

    let stage = Instant::now();
    let outcome = snapshot.convert(
        &request.flavor,
        &target.to_flavor,
        &request.service,
        Direction::Request,
        request.http.clone(),
        &convert_ctx,
    )?;
    // A dropped request converts to an empty body rather than an error.
    let content = outcome.into_content().unwrap_or_default();
    debug!(task_id = id, elapsed_ms = stage.elapsed().as_millis() as u64, "request converted");

    let entry = snapshot.service(&target.to_flavor, &request.service)?;
    let stage = Instant::now();
    let mut attempt: u32 = 0;
    let outcome = loop {
        match invoke(ctx, target, entry, &content, id).await {
            Ok(outcome) => break outcome,
            Err(err) if err.is_retryable() && attempt < ctx.retry.max_retries => {
                attempt += 1;
                let delay = ctx.retry.delay_for(attempt);
                warn!(
                    task_id = id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying upstream call"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    };
    debug!(task_id = id, elapsed_ms = stage.elapsed().as_millis() as u64, "invocation done");

    match outcome {
        InvokeOutcome::Unary(resp) => {
            let outcome = snapshot.convert(
                &target.to_flavor,
                &request.flavor,
                &request.service,
                Direction::Response,
                HttpContent::new(resp.headers, resp.body),
                &convert_ctx,
            )?;
            // A dropped response is treated as an empty result.
            let content = outcome.into_content().unwrap_or_default();
            let _ = tx_result
                .send(TaskResult::done(id, resp.status, content))
                .await;
        }
        InvokeOutcome::Stream(stream) => {
            relay_stream(ctx, id, request, target, &snapshot, &convert_ctx, stream, tx_result)
                .await?;
        }
    }
    Ok(())
}

async fn dispatch_to_bridge(
    ctx: &GatewayContext,
    id: u64,
    request: &ServiceRequest,
    target: &ServiceTarget,
    tx_result: &mpsc::Sender<TaskResult>,
) -> Result<(), TaskError> {
    let bridge = ctx
        .bridge()
        .ok_or_else(|| TaskError::Internal("no websocket bridge installed".to_string()))?;
    let kind = request
        .ws_conn_id
        .and_then(|conn_id| ctx.ws_sessions.get(conn_id))
        .and_then(|session| session.task_kind(id))
        .unwrap_or(WsTaskKind::Audio);
    bridge.dispatch_ws(id, request, target, kind).await?;
    let _ = tx_result
        .send(TaskResult::done(id, StatusCode::OK, HttpContent::default()))
        .await;
    Ok(())
}

/// Stream relay: prologue lines, converted chunks (drops skipped),
/// epilogue lines, then the terminal `done`. Failed sends mean the client
/// went away; the upstream stream is still drained so the provider call
/// terminates cleanly and the model token releases normally.
#[allow(clippy::too_many_arguments)]
async fn relay_stream(
    ctx: &GatewayContext,
    id: u64,
    request: &ServiceRequest,
    target: &ServiceTarget,
    snapshot: &RegistrySnapshot,
    convert_ctx: &ConvertContext,
    stream: StreamResponse,
    tx_result: &mpsc::Sender<TaskResult>,
) -> Result<(), TaskError> {
    let mode = detect_stream_mode(&stream.headers);
    if mode == StreamMode::NonStream {
        // Upstream ignored the stream request; collect and convert as a
        // unary response.
        let mut bytes = stream.bytes;
        let mut body = Vec::new();
        while let Some(item) = bytes.next().await {
            body.extend_from_slice(&item.map_err(TaskError::from_transport)?);
        }
        let outcome = snapshot.convert(
            &target.to_flavor,
            &request.flavor,
            &request.service,
            Direction::Response,
            HttpContent::new(stream.headers, bytes::Bytes::from(body)),
            convert_ctx,
        )?;
        let content = outcome.into_content().unwrap_or_default();
        let _ = tx_result
            .send(TaskResult::done(id, stream.status, content))
            .await;
        return Ok(());
    }

    let client_entry = snapshot.service(&request.flavor, &request.service)?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(mode.content_type()));

    for line in &client_entry.prologue {
        let content = HttpContent::new(headers.clone(), wrap_line(mode, line));
        let _ = tx_result.send(TaskResult::chunk(id, content)).await;
    }

    let mut chunks = chunk_stream(mode, stream.bytes);
    let mut emitted = 0u64;
    while let Some(item) = chunks.next().await {
        let payload = item.map_err(TaskError::from_transport)?;
        let outcome = snapshot.convert(
            &target.to_flavor,
            &request.flavor,
            &request.service,
            Direction::StreamResponse,
            HttpContent::new(HeaderMap::new(), payload),
            convert_ctx,
        )?;
        match outcome {
            ConvertOutcome::Drop => continue,
            ConvertOutcome::Content(converted) => {
                let wrapped = wrap_chunk(mode, &converted.body);
                let content = HttpContent::new(headers.clone(), wrapped);
                let _ = tx_result.send(TaskResult::chunk(id, content)).await;
                emitted += 1;
            }
        }
    }
    debug!(task_id = id, chunks = emitted, "upstream stream drained");

    for line in &client_entry.epilogue {
        let content = HttpContent::new(headers.clone(), wrap_line(mode, line));
        let _ = tx_result.send(TaskResult::chunk(id, content)).await;
    }
    let _ = tx_result
        .send(TaskResult::done(id, StatusCode::OK, HttpContent::new(headers, bytes::Bytes::new())))
        .await;
    Ok(())
}
