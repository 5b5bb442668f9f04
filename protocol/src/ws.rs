use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Events the gateway pushes to a WebSocket client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WsEventKind {
    TaskStarted,
    TaskFinished,
    ResultGenerated,
    TaskFailed,
}

pub const WS_ERROR_CODE_CLIENT: &str = "CLIENT_ERROR";
pub const WS_ERROR_CODE_SERVER: &str = "SERVER_ERROR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEventHeader {
    pub task_id: String,
    pub event: WsEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Envelope for every server-originated WebSocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsServerEvent {
    pub header: WsEventHeader,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl WsServerEvent {
    pub fn new(task_id: impl Into<String>, event: WsEventKind) -> Self {
        Self {
            header: WsEventHeader {
                task_id: task_id.into(),
                event,
                error_code: None,
                error_message: None,
            },
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn failed(
        task_id: impl Into<String>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(task_id, WsEventKind::TaskFailed);
        event.header.error_code = Some(code.to_string());
        event.header.error_message = Some(message.into());
        event
    }
}

/// Payload of a `result-generated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultGenerated {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    pub text: String,
}

/// Control actions a client can send on an STT WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ClientAction {
    RunTask,
    FinishTask,
}

/// Shape a text frame is parsed against. Anything that fails to parse, and
/// every binary frame, is treated as audio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ClientAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// What kind of work a WS-originated task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum WsTaskKind {
    RunTask,
    Audio,
    FinishTask,
}

/// Speech-to-text session parameters, normalized by middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttParams {
    #[serde(default = "default_audio_format", rename = "format")]
    pub audio_format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub use_vad: bool,
    #[serde(default = "default_return_format")]
    pub return_format: String,
}

fn default_audio_format() -> String {
    "pcm".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_language() -> String {
    "zh".to_string()
}

fn default_return_format() -> String {
    "text".to_string()
}

impl Default for SttParams {
    fn default() -> Self {
        Self {
            audio_format: default_audio_format(),
            sample_rate: default_sample_rate(),
            language: default_language(),
            use_vad: false,
            return_format: default_return_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn server_event_envelope_shape() {
        let event = WsServerEvent::new("42", WsEventKind::ResultGenerated).with_payload(json!({
            "text": "hello",
        }));
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(
            encoded,
            json!({
                "header": { "task_id": "42", "event": "result-generated" },
                "payload": { "text": "hello" },
            })
        );
    }

    #[test]
    fn failed_event_carries_code_and_message() {
        let event = WsServerEvent::failed("7", WS_ERROR_CODE_CLIENT, "audio data too large");
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["header"]["event"], "task-failed");
        assert_eq!(encoded["header"]["error_code"], "CLIENT_ERROR");
        assert_eq!(encoded["header"]["error_message"], "audio data too large");
    }

    #[test]
    fn client_frame_parses_run_task() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "task": "speech-to-text-ws",
            "action": "run-task",
            "model": "paraformer",
            "parameters": { "format": "pcm", "sample_rate": 16000, "language": "zh" },
        }))
        .unwrap();
        assert_eq!(frame.action, Some(ClientAction::RunTask));
        assert_eq!(frame.model.as_deref(), Some("paraformer"));
    }

    #[test]
    fn stt_params_apply_documented_defaults() {
        let params: SttParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(
            params,
            SttParams {
                audio_format: "pcm".to_string(),
                sample_rate: 16000,
                language: "zh".to_string(),
                use_vad: false,
                return_format: "text".to_string(),
            }
        );
    }
}
