//! Per-service request validation and normalization, run before flavor
//! conversion. The chain is identical across tasks; per-service variation
//! lives in the stage list returned by [`stages_for`]. Stages may rewrite
//! the request body in place.

use crate::context::GatewayContext;
use crate::error::TaskError;
use aog_client::HttpTransport as _;
use aog_protocol::ServiceRequest;
use aog_protocol::ServiceTarget;
use aog_protocol::entity::AuthType;
use aog_protocol::entity::Location;
use aog_protocol::ws::SttParams;
use aog_protocol::ws::WsTaskKind;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::Method;
use tracing::debug;

pub const MAX_WS_AUDIO_FRAME: usize = 10 * 1024 * 1024;

const MAX_IMAGE_EDGE: u32 = 4096;
const MAX_IMAGE_BATCH: u64 = 4;
const VALID_SAMPLE_RATES: &[u32] = &[8000, 16000, 22050, 44100, 48000];
const VALID_RETURN_FORMATS: &[&str] = &["text", "json", "srt", "vtt"];
const LOCAL_TTS_VOICES: &[&str] = &["male", "female", "neutral"];

#[derive(Debug, Clone, Copy)]
pub(crate) enum Stage {
    TextToImage,
    SpeechToText,
    SpeechToTextWs,
    Chat,
    TextToSpeech,
    ImageInput,
}

pub(crate) fn stages_for(service: &str) -> &'static [Stage] {
    match service {
        "text-to-image" => &[Stage::TextToImage],
        "speech-to-text" => &[Stage::SpeechToText],
        "speech-to-text-ws" => &[Stage::SpeechToTextWs],
        "chat" => &[Stage::Chat],
        "text-to-speech" => &[Stage::TextToSpeech],
        "image-to-image" | "image-to-video" => &[Stage::ImageInput],
        _ => &[],
    }
}

pub async fn run(
    ctx: &GatewayContext,
    task_id: u64,
    request: &mut ServiceRequest,
    target: &ServiceTarget,
) -> Result<(), TaskError> {
    for stage in stages_for(&request.service) {
        match stage {
            Stage::TextToImage => text_to_image(request)?,
            Stage::SpeechToText => speech_to_text(ctx, request, target).await?,
            Stage::SpeechToTextWs => speech_to_text_ws(ctx, task_id, request)?,
            Stage::Chat => {}
            Stage::TextToSpeech => text_to_speech(request, target)?,
            Stage::ImageInput => image_input(ctx, request, target).await?,
        }
    }
    Ok(())
}

fn parse_body(request: &ServiceRequest) -> Result<serde_json::Value, TaskError> {
    serde_json::from_slice(&request.http.body)
        .map_err(|err| TaskError::Validation(format!("request body is not valid JSON: {err}")))
}

fn store_body(request: &mut ServiceRequest, body: &serde_json::Value) {
    request.http.replace_body(Bytes::from(body.to_string()));
}

fn text_to_image(request: &mut ServiceRequest) -> Result<(), TaskError> {
    let body = parse_body(request)?;

    if let Some(size) = body.get("size").and_then(|v| v.as_str()) {
        let (w, h) = size
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
            .ok_or_else(|| {
                TaskError::Validation(format!("size must look like WxH, got {size:?}"))
            })?;
        if w == 0 || h == 0 || w > MAX_IMAGE_EDGE || h > MAX_IMAGE_EDGE {
            return Err(TaskError::Validation(format!(
                "size out of range: {w}x{h} (max {MAX_IMAGE_EDGE})"
            )));
        }
    }

    if let Some(n) = body.get("n") {
        let n = n
            .as_u64()
            .ok_or_else(|| TaskError::Validation("n must be an integer".to_string()))?;
        if !(1..=MAX_IMAGE_BATCH).contains(&n) {
            return Err(TaskError::Validation(format!(
                "n must be between 1 and {MAX_IMAGE_BATCH}, got {n}"
            )));
        }
    }
    Ok(())
}

/// File-based speech-to-text. Local targets want a file path on disk,
/// remote targets want base64 (or raw octet-stream for signature flavors),
/// so the body is rewritten to whatever the target can consume.
async fn speech_to_text(
    ctx: &GatewayContext,
    request: &mut ServiceRequest,
    target: &ServiceTarget,
) -> Result<(), TaskError> {
    if request.http.is_binary() {
        return Ok(());
    }
    let mut body = parse_body(request)?;
    let file_type = body
        .get("file_type")
        .and_then(|v| v.as_str())
        .unwrap_or("path")
        .to_string();
    let file = body
        .get("file")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match (file_type.as_str(), target.location) {
        ("path", Location::Remote) => {
            let audio = tokio::fs::read(&file).await.map_err(|err| {
                TaskError::Validation(format!("cannot read audio file {file:?}: {err}"))
            })?;
            if target.auth_type() == AuthType::Sign {
                // Signature flavors take the raw audio bytes directly.
                request.http.header.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/octet-stream"),
                );
                request.http.replace_body(Bytes::from(audio));
                return Ok(());
            }
            let encoded = BASE64.encode(&audio);
            body["speech_length"] = serde_json::Value::from(audio.len() as u64);
            body["speech"] = serde_json::Value::from(encoded);
            body["file_type"] = serde_json::Value::from("base64");
            if let Some(obj) = body.as_object_mut() {
                obj.remove("file");
            }
            store_body(request, &body);
        }
        ("url", Location::Local) => {
            let path = download_to_cache(ctx, &file).await?;
            body["file_type"] = serde_json::Value::from("path");
            body["file"] = serde_json::Value::from(path);
            store_body(request, &body);
        }
        _ => {}
    }
    Ok(())
}

async fn download_to_cache(ctx: &GatewayContext, url: &str) -> Result<String, TaskError> {
    let req = aog_client::Request::new(Method::GET, url);
    let resp = ctx
        .transport
        .execute(req)
        .await
        .map_err(TaskError::from_transport)?;
    let path = ctx
        .cache_dir
        .join(format!("aog-media-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, &resp.body)
        .await
        .map_err(|err| TaskError::Internal(format!("cannot write cache file: {err}")))?;
    debug!(url, path = %path.display(), "downloaded media for local provider");
    Ok(path.display().to_string())
}

/// WebSocket speech-to-text. Behavior depends on what kind of frame the
/// task carries; the kind was recorded by the connection reader.
fn speech_to_text_ws(
    ctx: &GatewayContext,
    task_id: u64,
    request: &mut ServiceRequest,
) -> Result<(), TaskError> {
    let conn_id = request
        .ws_conn_id
        .ok_or_else(|| TaskError::Validation("speech-to-text-ws requires a websocket connection".to_string()))?;
    let session = ctx
        .ws_sessions
        .get(conn_id)
        .ok_or_else(|| TaskError::Validation(format!("no websocket session {conn_id}")))?;

    let kind = session.task_kind(task_id).unwrap_or(WsTaskKind::Audio);
    match kind {
        WsTaskKind::RunTask => {
            let mut body = parse_body(request)?;
            let params_value = body
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            let mut params: SttParams = serde_json::from_value(params_value)
                .map_err(|err| TaskError::Validation(format!("bad stt parameters: {err}")))?;
            if params.language.is_empty() {
                params.language = "zh".to_string();
            }
            if !VALID_SAMPLE_RATES.contains(&params.sample_rate) {
                return Err(TaskError::Validation(format!(
                    "unsupported sample rate {}",
                    params.sample_rate
                )));
            }
            if !VALID_RETURN_FORMATS.contains(&params.return_format.as_str()) {
                return Err(TaskError::Validation(format!(
                    "unsupported return format {:?}",
                    params.return_format
                )));
            }
            body["parameters"] = serde_json::to_value(&params)
                .map_err(|err| TaskError::Internal(err.to_string()))?;
            store_body(request, &body);
            session.set_params(params);
        }
        WsTaskKind::Audio => {
            let len = request.http.body.len();
            if len == 0 {
                return Err(TaskError::Validation("audio frame is empty".to_string()));
            }
            if len > MAX_WS_AUDIO_FRAME {
                return Err(TaskError::Validation("audio data too large".to_string()));
            }
            session.add_audio_bytes(len as u64);
        }
        WsTaskKind::FinishTask => {
            session.mark_finished();
        }
    }
    Ok(())
}

fn text_to_speech(request: &mut ServiceRequest, target: &ServiceTarget) -> Result<(), TaskError> {
    let mut body = parse_body(request)?;
    let text = body
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if text.is_empty() {
        return Err(TaskError::Validation("text must not be empty".to_string()));
    }

    match target.location {
        Location::Local => {
            if let Some(voice) = body.get("voice").and_then(|v| v.as_str())
                && !LOCAL_TTS_VOICES.contains(&voice)
            {
                return Err(TaskError::Validation(format!(
                    "unsupported voice {voice:?}"
                )));
            }
            if !text.is_ascii() {
                return Err(TaskError::Validation(
                    "local text-to-speech only accepts ASCII text".to_string(),
                ));
            }
        }
        Location::Remote => {
            body["request_id"] = serde_json::Value::from(uuid::Uuid::new_v4().to_string());
            store_body(request, &body);
        }
    }
    Ok(())
}

/// Image-carrying services. The image reference is converted between
/// path/url/base64 forms the same way speech-to-text handles audio files.
async fn image_input(
    ctx: &GatewayContext,
    request: &mut ServiceRequest,
    target: &ServiceTarget,
) -> Result<(), TaskError> {
    let mut body = parse_body(request)?;
    let image_type = body
        .get("image_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TaskError::Validation("image_type is required".to_string()))?
        .to_string();
    if !matches!(image_type.as_str(), "url" | "path" | "base64") {
        return Err(TaskError::Validation(format!(
            "image_type must be url, path or base64, got {image_type:?}"
        )));
    }
    let image = body
        .get("image")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match (image_type.as_str(), target.location) {
        ("path", Location::Remote) => {
            let data = tokio::fs::read(&image).await.map_err(|err| {
                TaskError::Validation(format!("cannot read image file {image:?}: {err}"))
            })?;
            body["image"] = serde_json::Value::from(BASE64.encode(&data));
            body["image_type"] = serde_json::Value::from("base64");
            store_body(request, &body);
        }
        ("url", Location::Local) => {
            let path = download_to_cache(ctx, &image).await?;
            body["image"] = serde_json::Value::from(path);
            body["image_type"] = serde_json::Value::from("path");
            store_body(request, &body);
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aog_api::FlavorRegistry;
    use aog_client::ReqwestTransport;
    use aog_protocol::HttpContent;
    use aog_protocol::MemStore;
    use aog_protocol::ServiceProvider;
    use aog_protocol::entity::ServiceProtocol;
    use serde_json::json;
    use std::sync::Arc;

    fn test_ctx() -> GatewayContext {
        GatewayContext::new(
            Arc::new(MemStore::new()),
            Arc::new(FlavorRegistry::from_embedded().unwrap()),
            Arc::new(ReqwestTransport::new().unwrap()),
        )
    }

    fn target(location: Location) -> ServiceTarget {
        ServiceTarget {
            location,
            model: "m".to_string(),
            to_flavor: "ollama".to_string(),
            protocol: ServiceProtocol::Http,
            stream: false,
            provider: ServiceProvider::default(),
        }
    }

    fn request(service: &str, body: serde_json::Value) -> ServiceRequest {
        ServiceRequest::new("aog", service).with_http(HttpContent::from_json(&body))
    }

    #[tokio::test]
    async fn text_to_image_validates_size_and_batch() {
        let ctx = test_ctx();
        let mut ok = request("text-to-image", json!({"prompt": "a puppy", "size": "1024x1024", "n": 2}));
        run(&ctx, 1, &mut ok, &target(Location::Local)).await.unwrap();

        let mut bad_size = request("text-to-image", json!({"prompt": "p", "size": "huge"}));
        let err = run(&ctx, 1, &mut bad_size, &target(Location::Local))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));

        let mut too_large = request("text-to-image", json!({"prompt": "p", "size": "8192x64"}));
        assert!(run(&ctx, 1, &mut too_large, &target(Location::Local)).await.is_err());

        let mut bad_batch = request("text-to-image", json!({"prompt": "p", "n": 9}));
        assert!(run(&ctx, 1, &mut bad_batch, &target(Location::Local)).await.is_err());
    }

    #[tokio::test]
    async fn chat_is_a_pass_through() {
        let ctx = test_ctx();
        let mut req = request("chat", json!({"model": "m", "messages": []}));
        let before = req.http.body.clone();
        run(&ctx, 1, &mut req, &target(Location::Local)).await.unwrap();
        assert_eq!(req.http.body, before);
    }

    #[tokio::test]
    async fn tts_requires_text_and_ascii_locally() {
        let ctx = test_ctx();
        let mut empty = request("text-to-speech", json!({"text": ""}));
        assert!(run(&ctx, 1, &mut empty, &target(Location::Local)).await.is_err());

        let mut non_ascii = request("text-to-speech", json!({"text": "你好"}));
        assert!(run(&ctx, 1, &mut non_ascii, &target(Location::Local)).await.is_err());

        let mut bad_voice = request("text-to-speech", json!({"text": "hi", "voice": "robot"}));
        assert!(run(&ctx, 1, &mut bad_voice, &target(Location::Local)).await.is_err());

        let mut remote = request("text-to-speech", json!({"text": "你好"}));
        run(&ctx, 1, &mut remote, &target(Location::Remote)).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&remote.http.body).unwrap();
        assert!(body["request_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn stt_path_to_base64_for_remote() {
        let ctx = test_ctx();
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("clip.wav");
        tokio::fs::write(&audio_path, b"RIFFdata").await.unwrap();

        let mut req = request(
            "speech-to-text",
            json!({"file_type": "path", "file": audio_path.display().to_string()}),
        );
        // The ws-less stt stage needs a kind-agnostic target.
        run(&ctx, 1, &mut req, &target(Location::Remote)).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&req.http.body).unwrap();
        assert_eq!(body["file_type"], "base64");
        assert_eq!(body["speech_length"], 8);
        assert_eq!(
            body["speech"].as_str().unwrap(),
            BASE64.encode(b"RIFFdata")
        );
        assert!(body.get("file").is_none());
    }

    #[tokio::test]
    async fn stt_sign_flavor_sends_raw_audio() {
        let ctx = test_ctx();
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("clip.wav");
        tokio::fs::write(&audio_path, b"RIFFdata").await.unwrap();

        let mut tgt = target(Location::Remote);
        tgt.provider.auth_type = AuthType::Sign;
        let mut req = request(
            "speech-to-text",
            json!({"file_type": "path", "file": audio_path.display().to_string()}),
        );
        run(&ctx, 1, &mut req, &tgt).await.unwrap();
        assert!(req.http.is_binary());
        assert_eq!(req.http.body.as_ref(), b"RIFFdata");
    }

    #[tokio::test]
    async fn ws_audio_frames_are_bounded() {
        let ctx = test_ctx();
        let session = ctx.ws_sessions.register("aog", "speech-to-text-ws");
        session.track_task(7, WsTaskKind::Audio);

        let mut oversized = ServiceRequest::new("aog", "speech-to-text-ws").with_http(
            HttpContent::new(http::HeaderMap::new(), Bytes::from(vec![0u8; MAX_WS_AUDIO_FRAME + 1])),
        );
        oversized.ws_conn_id = Some(session.conn_id);
        let err = run(&ctx, 7, &mut oversized, &target(Location::Local))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(ref msg) if msg == "audio data too large"));
        // Rejected frames do not count toward the session totals.
        assert_eq!(session.total_audio_bytes(), 0);

        session.track_task(8, WsTaskKind::Audio);
        let mut ok = ServiceRequest::new("aog", "speech-to-text-ws").with_http(HttpContent::new(
            http::HeaderMap::new(),
            Bytes::from(vec![0u8; 1024]),
        ));
        ok.ws_conn_id = Some(session.conn_id);
        run(&ctx, 8, &mut ok, &target(Location::Local)).await.unwrap();
        assert_eq!(session.total_audio_bytes(), 1024);

        let mut empty = ServiceRequest::new("aog", "speech-to-text-ws")
            .with_http(HttpContent::new(http::HeaderMap::new(), Bytes::new()));
        empty.ws_conn_id = Some(session.conn_id);
        session.track_task(9, WsTaskKind::Audio);
        assert!(run(&ctx, 9, &mut empty, &target(Location::Local)).await.is_err());
    }

    #[tokio::test]
    async fn ws_run_task_normalizes_parameters() {
        let ctx = test_ctx();
        let session = ctx.ws_sessions.register("aog", "speech-to-text-ws");
        session.track_task(3, WsTaskKind::RunTask);

        let mut req = request(
            "speech-to-text-ws",
            json!({"task": "speech-to-text-ws", "action": "run-task", "parameters": {"format": "pcm"}}),
        );
        req.ws_conn_id = Some(session.conn_id);
        run(&ctx, 3, &mut req, &target(Location::Local)).await.unwrap();

        let params = session.params();
        assert_eq!(params.language, "zh");
        assert_eq!(params.sample_rate, 16000);
        assert_eq!(params.return_format, "text");

        let body: serde_json::Value = serde_json::from_slice(&req.http.body).unwrap();
        assert_eq!(body["parameters"]["sample_rate"], 16000);

        // Invalid sample rate rejected.
        session.track_task(4, WsTaskKind::RunTask);
        let mut bad = request(
            "speech-to-text-ws",
            json!({"action": "run-task", "parameters": {"sample_rate": 12345}}),
        );
        bad.ws_conn_id = Some(session.conn_id);
        assert!(run(&ctx, 4, &mut bad, &target(Location::Local)).await.is_err());
    }

    #[tokio::test]
    async fn image_input_requires_known_type() {
        let ctx = test_ctx();
        let mut missing = request("image-to-video", json!({"image": "x"}));
        assert!(run(&ctx, 1, &mut missing, &target(Location::Local)).await.is_err());

        let mut bad = request("image-to-image", json!({"image_type": "carrier-pigeon", "image": "x"}));
        assert!(run(&ctx, 1, &mut bad, &target(Location::Local)).await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("img.png");
        tokio::fs::write(&image_path, b"PNG!").await.unwrap();
        let mut ok = request(
            "image-to-image",
            json!({"image_type": "path", "image": image_path.display().to_string()}),
        );
        run(&ctx, 1, &mut ok, &target(Location::Remote)).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&ok.http.body).unwrap();
        assert_eq!(body["image_type"], "base64");
        assert_eq!(body["image"].as_str().unwrap(), BASE64.encode(b"PNG!"));
    }
}
