//! OpenAI Realtime engine.
//!
//! Dials `wss://api.openai.com/v1/realtime` (or a configured override) with
//! a bearer-token `Authorization` header and the `OpenAI-Beta: realtime=v1`
//! header, then exchanges JSON text frames over the resulting duplex
//! socket.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{apply_options, EngineConfig, EngineOption, ToolCall, ToolResult, ToolResultContent};
use crate::error::{ProviderError, Result};
use crate::registry::EngineFactory;
use crate::session::{Engine, Session, SessionEvent};

use super::{cancellable, dial, WsHandle};

const PROVIDER_ID: &str = "openai_realtime";
const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";
const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

/// Builds [`OpenAiEngine`]s from config. Registered under `"openai_realtime"`.
pub struct OpenAiFactory;

#[async_trait]
impl EngineFactory for OpenAiFactory {
    async fn build(&self, config: EngineConfig) -> Result<Box<dyn Engine>> {
        if config.extra("api_key").is_none() {
            return Err(ProviderError::Config(
                "openai_realtime requires extras[\"api_key\"]".into(),
            ));
        }
        Ok(Box::new(OpenAiEngine { config }))
    }
}

pub struct OpenAiEngine {
    config: EngineConfig,
}

#[async_trait]
impl Engine for OpenAiEngine {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    #[instrument(skip_all, fields(provider = PROVIDER_ID, session_id = tracing::field::Empty))]
    async fn start(
        &self,
        options: Vec<EngineOption>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Session>> {
        let session_id = uuid::Uuid::new_v4();
        tracing::Span::current().record("session_id", tracing::field::display(session_id));
        let config = apply_options(self.config.clone(), options);

        let api_key = config
            .extra("api_key")
            .ok_or_else(|| ProviderError::Config("openai_realtime requires extras[\"api_key\"]".into()))?
            .to_string();
        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = config
            .extra("base_url")
            .unwrap_or(DEFAULT_ENDPOINT)
            .to_string();

        let mut url = url::Url::parse(&base_url)
            .map_err(|e| ProviderError::start(PROVIDER_ID, ProviderError::Config(e.to_string())))?;
        url.query_pairs_mut().append_pair("model", &model);
        let request = http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("OpenAI-Beta", "realtime=v1")
            .body(())
            .map_err(|e| ProviderError::start(PROVIDER_ID, ProviderError::Config(e.to_string())))?;

        let (sink, source) = cancellable(dial(request, PROVIDER_ID), cancel.clone()).await?;
        let (handle, _read_task) = WsHandle::spawn(sink, source, decode_envelope, PROVIDER_ID, cancel.clone());

        let session = OpenAiSession { ws: handle };
        session.configure(&config, cancel).await?;
        session.ws.mark_ready();
        Ok(Box::new(session))
    }
}

struct OpenAiSession {
    ws: WsHandle,
}

impl OpenAiSession {
    async fn configure(&self, config: &EngineConfig, cancel: CancellationToken) -> Result<()> {
        let mut session = serde_json::json!({
            "modalities": ["audio", "text"],
            "voice": config.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "turn_detection": { "type": "server_vad" },
        });
        if let Some(instructions) = &config.instructions {
            session["instructions"] = serde_json::Value::String(instructions.clone());
        }
        if !config.tools.is_empty() {
            session["tools"] = serde_json::Value::Array(
                config
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }

        self.ws
            .send_json(serde_json::json!({ "type": "session.update", "session": session }), cancel)
            .await
    }
}

#[async_trait]
impl Session for OpenAiSession {
    async fn send_audio(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<()> {
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, audio);
        self.ws
            .send_json(
                serde_json::json!({ "type": "input_audio_buffer.append", "audio": b64 }),
                cancel,
            )
            .await
    }

    async fn send_text(&self, text: String, cancel: CancellationToken) -> Result<()> {
        self.ws
            .send_json(
                serde_json::json!({
                    "type": "conversation.item.create",
                    "item": {
                        "type": "message",
                        "role": "user",
                        "content": [{ "type": "input_text", "text": text }],
                    }
                }),
                cancel.clone(),
            )
            .await?;
        self.ws
            .send_json(serde_json::json!({ "type": "response.create" }), cancel)
            .await
    }

    async fn send_tool_result(&self, result: ToolResult, cancel: CancellationToken) -> Result<()> {
        let output = result
            .content
            .iter()
            .map(|c| match c {
                ToolResultContent::Text(text) => text.clone(),
                ToolResultContent::Structured(value) => value.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");

        self.ws
            .send_json(
                serde_json::json!({
                    "type": "conversation.item.create",
                    "item": {
                        "type": "function_call_output",
                        "call_id": result.call_id,
                        "output": output,
                    }
                }),
                cancel.clone(),
            )
            .await?;
        self.ws
            .send_json(serde_json::json!({ "type": "response.create" }), cancel)
            .await
    }

    async fn recv(&self) -> Option<SessionEvent> {
        self.ws.recv().await
    }

    async fn interrupt(&self, cancel: CancellationToken) -> Result<()> {
        self.ws
            .send_json(serde_json::json!({ "type": "response.cancel" }), cancel)
            .await
    }

    async fn close(&self) {
        self.ws.close().await;
    }
}

/// Decode one OpenAI Realtime server envelope into zero or more session
/// events. Unknown `type` values are ignored.
fn decode_envelope(value: &serde_json::Value) -> Vec<SessionEvent> {
    let Some(kind) = value.get("type").and_then(|v| v.as_str()) else {
        return Vec::new();
    };

    match kind {
        "response.audio.delta" => value
            .get("delta")
            .and_then(|v| v.as_str())
            .and_then(|b64| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64).ok())
            .map(|audio| vec![SessionEvent::AudioOutput { audio }])
            .unwrap_or_default(),

        "response.audio_transcript.delta" => value
            .get("delta")
            .and_then(|v| v.as_str())
            .map(|text| vec![SessionEvent::TextOutput { text: text.to_string() }])
            .unwrap_or_default(),

        "conversation.item.input_audio_transcription.completed" => value
            .get("transcript")
            .and_then(|v| v.as_str())
            .map(|text| vec![SessionEvent::Transcript { text: text.to_string() }])
            .unwrap_or_default(),

        "response.function_call_arguments.done" => {
            let call_id = value.get("call_id").and_then(|v| v.as_str());
            let name = value.get("name").and_then(|v| v.as_str());
            let arguments = value.get("arguments").and_then(|v| v.as_str());
            match (call_id, name, arguments) {
                (Some(call_id), Some(name), Some(arguments)) => vec![SessionEvent::ToolCall(ToolCall {
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                })],
                _ => Vec::new(),
            }
        }

        "response.done" => vec![SessionEvent::TurnEnd],

        "error" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown OpenAI realtime error")
                .to_string();
            vec![SessionEvent::Error { message }]
        }

        _ => Vec::new(),
    }
}
