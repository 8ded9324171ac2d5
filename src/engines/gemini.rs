//! Gemini Live engine.
//!
//! Dials the BidiGenerateContent WebSocket endpoint with the API key as a
//! `key` query parameter, then exchanges JSON text frames over the
//! resulting duplex socket.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{apply_options, EngineConfig, EngineOption, ToolCall, ToolResult, ToolResultContent};
use crate::error::{ProviderError, Result};
use crate::registry::EngineFactory;
use crate::session::{Engine, Session, SessionEvent};

use super::{cancellable, dial, WsHandle};

const PROVIDER_ID: &str = "gemini_live";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
const DEFAULT_VOICE: &str = "Puck";
const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Builds [`GeminiEngine`]s from config. Registered under `"gemini_live"`.
pub struct GeminiFactory;

#[async_trait]
impl EngineFactory for GeminiFactory {
    async fn build(&self, config: EngineConfig) -> Result<Box<dyn Engine>> {
        if config.extra("api_key").is_none() {
            return Err(ProviderError::Config(
                "gemini_live requires extras[\"api_key\"]".into(),
            ));
        }
        Ok(Box::new(GeminiEngine { config }))
    }
}

pub struct GeminiEngine {
    config: EngineConfig,
}

#[async_trait]
impl Engine for GeminiEngine {
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
            .ok_or_else(|| ProviderError::Config("gemini_live requires extras[\"api_key\"]".into()))?
            .to_string();
        let base_url = config.extra("base_url").unwrap_or(DEFAULT_ENDPOINT).to_string();

        let mut url = url::Url::parse(&base_url)
            .map_err(|e| ProviderError::start(PROVIDER_ID, ProviderError::Config(e.to_string())))?;
        url.query_pairs_mut().append_pair("key", &api_key);
        let request = http::Request::builder()
            .uri(url.as_str())
            .body(())
            .map_err(|e| ProviderError::start(PROVIDER_ID, ProviderError::Config(e.to_string())))?;

        let (sink, source) = cancellable(dial(request, PROVIDER_ID), cancel.clone()).await?;
        let (handle, _read_task) = WsHandle::spawn(sink, source, decode_envelope, PROVIDER_ID, cancel.clone());

        let session = GeminiSession { ws: handle };
        session.configure(&config, cancel).await?;
        session.ws.mark_ready();
        Ok(Box::new(session))
    }
}

struct GeminiSession {
    ws: WsHandle,
}

impl GeminiSession {
    async fn configure(&self, config: &EngineConfig, cancel: CancellationToken) -> Result<()> {
        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let voice = config.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let mut setup = serde_json::json!({
            "model": format!("models/{model}"),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });
        if let Some(instructions) = &config.instructions {
            setup["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": instructions }]
            });
        }
        if !config.tools.is_empty() {
            setup["tools"] = serde_json::json!([{
                "functionDeclarations": config.tools.iter().map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })).collect::<Vec<_>>()
            }]);
        }

        self.ws
            .send_json(serde_json::json!({ "setup": setup }), cancel)
            .await
    }
}

#[async_trait]
impl Session for GeminiSession {
    async fn send_audio(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<()> {
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, audio);
        self.ws
            .send_json(
                serde_json::json!({
                    "realtimeInput": {
                        "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": b64 }]
                    }
                }),
                cancel,
            )
            .await
    }

    async fn send_text(&self, text: String, cancel: CancellationToken) -> Result<()> {
        self.ws
            .send_json(
                serde_json::json!({
                    "clientContent": {
                        "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                        "turnComplete": true,
                    }
                }),
                cancel,
            )
            .await
    }

    async fn send_tool_result(&self, result: ToolResult, cancel: CancellationToken) -> Result<()> {
        let response = result
            .content
            .iter()
            .map(|c| match c {
                ToolResultContent::Text(text) => serde_json::json!({ "text": text }),
                ToolResultContent::Structured(value) => value.clone(),
            })
            .next()
            .unwrap_or(serde_json::Value::Null);

        self.ws
            .send_json(
                serde_json::json!({
                    "toolResponse": {
                        "functionResponses": [{
                            "id": result.call_id,
                            "response": response,
                        }]
                    }
                }),
                cancel,
            )
            .await
    }

    async fn recv(&self) -> Option<SessionEvent> {
        self.ws.recv().await
    }

    async fn interrupt(&self, _cancel: CancellationToken) -> Result<()> {
        // Gemini Live handles barge-in via server-side VAD; nothing to send.
        Ok(())
    }

    async fn close(&self) {
        self.ws.close().await;
    }
}

/// Decode one Gemini Live server envelope into zero or more session events.
fn decode_envelope(value: &serde_json::Value) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    if let Some(content) = value.get("serverContent") {
        if let Some(parts) = content
            .get("modelTurn")
            .and_then(|t| t.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(b64) = part
                    .get("inlineData")
                    .and_then(|d| d.get("data"))
                    .and_then(|v| v.as_str())
                {
                    if let Ok(audio) =
                        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
                    {
                        events.push(SessionEvent::AudioOutput { audio });
                    }
                }
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    events.push(SessionEvent::TextOutput { text: text.to_string() });
                }
            }
        }
        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            events.push(SessionEvent::TurnEnd);
        }
    }

    if let Some(calls) = value
        .get("toolCall")
        .and_then(|t| t.get("functionCalls"))
        .and_then(|c| c.as_array())
    {
        for call in calls {
            let id = call.get("id").and_then(|v| v.as_str());
            let name = call.get("name").and_then(|v| v.as_str());
            let args = call.get("args");
            if let (Some(id), Some(name)) = (id, name) {
                events.push(SessionEvent::ToolCall(ToolCall {
                    call_id: id.to_string(),
                    name: name.to_string(),
                    arguments: args.map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string()),
                }));
            }
        }
    }

    if let Some(message) = value.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()) {
        events.push(SessionEvent::Error { message: message.to_string() });
    }

    events
}
