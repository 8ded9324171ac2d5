//! Nova (Amazon Bedrock) engine.
//!
//! Bedrock's bidirectional-stream dial requires a SigV4-presigned URL
//! (see [`sigv4`]) rather than OpenAI/Gemini's simpler bearer/query-param
//! auth.

mod sigv4;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{apply_options, EngineConfig, EngineOption, ToolCall, ToolResult, ToolResultContent};
use crate::error::{ProviderError, Result};
use crate::registry::EngineFactory;
use crate::session::{Engine, Session, SessionEvent};

use super::{cancellable, dial, WsHandle};

const PROVIDER_ID: &str = "nova";
const DEFAULT_MODEL: &str = "amazon.nova-sonic-v1:0";
const DEFAULT_REGION: &str = "us-east-1";

/// Builds [`NovaEngine`]s from config. Registered under `"nova"`.
pub struct NovaFactory;

#[async_trait]
impl EngineFactory for NovaFactory {
    async fn build(&self, config: EngineConfig) -> Result<Box<dyn Engine>> {
        for required in ["aws_access_key_id", "aws_secret_access_key"] {
            if config.extra(required).is_none() {
                return Err(ProviderError::Config(format!(
                    "nova requires extras[{required:?}]"
                )));
            }
        }
        Ok(Box::new(NovaEngine { config }))
    }
}

pub struct NovaEngine {
    config: EngineConfig,
}

#[async_trait]
impl Engine for NovaEngine {
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

        let access_key_id = config
            .extra("aws_access_key_id")
            .ok_or_else(|| ProviderError::Config("nova requires extras[\"aws_access_key_id\"]".into()))?
            .to_string();
        let secret_access_key = config
            .extra("aws_secret_access_key")
            .ok_or_else(|| ProviderError::Config("nova requires extras[\"aws_secret_access_key\"]".into()))?
            .to_string();
        let session_token = config.extra("aws_session_token").map(str::to_string);
        let region = config.extra("region").unwrap_or(DEFAULT_REGION).to_string();
        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let default_base = format!("wss://bedrock-runtime.{region}.amazonaws.com");
        let base = config.extra("base_url").unwrap_or(&default_base);
        let path = format!("/model/{model}/converse-stream");

        let mut url = url::Url::parse(base)
            .map_err(|e| ProviderError::start(PROVIDER_ID, ProviderError::Config(e.to_string())))?;
        url.set_path(&path);
        let host = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        let creds = sigv4::Credentials {
            access_key_id: &access_key_id,
            secret_access_key: &secret_access_key,
            session_token: session_token.as_deref(),
            region: &region,
        };
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let query = sigv4::presign_websocket_url(&host, &path, &creds, &timestamp);
        url.set_query(Some(&query));

        let request = http::Request::builder()
            .uri(url.as_str())
            .header("host", host)
            .body(())
            .map_err(|e| ProviderError::start(PROVIDER_ID, ProviderError::Config(e.to_string())))?;

        let (sink, source) = cancellable(dial(request, PROVIDER_ID), cancel.clone()).await?;
        let (handle, _read_task) = WsHandle::spawn(sink, source, decode_envelope, PROVIDER_ID, cancel.clone());

        let session = NovaSession { ws: handle };
        session.configure(&config, cancel).await?;
        session.ws.mark_ready();
        Ok(Box::new(session))
    }
}

struct NovaSession {
    ws: WsHandle,
}

impl NovaSession {
    async fn configure(&self, config: &EngineConfig, cancel: CancellationToken) -> Result<()> {
        let mut session_start = serde_json::json!({
            "inferenceConfiguration": {
                "maxTokens": 1024,
                "topP": 0.9,
                "temperature": 0.7,
            }
        });
        if let Some(instructions) = &config.instructions {
            session_start["system"] = serde_json::json!([{ "text": instructions }]);
        }
        if !config.tools.is_empty() {
            session_start["toolConfig"] = serde_json::json!({
                "tools": config.tools.iter().map(|t| serde_json::json!({
                    "toolSpec": {
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": { "json": t.input_schema },
                    }
                })).collect::<Vec<_>>()
            });
        }
        self.ws
            .send_json(serde_json::json!({ "sessionStart": session_start }), cancel)
            .await
    }
}

#[async_trait]
impl Session for NovaSession {
    async fn send_audio(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<()> {
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, audio);
        self.ws
            .send_json(serde_json::json!({ "inputAudio": { "audioChunk": b64 } }), cancel)
            .await
    }

    async fn send_text(&self, text: String, cancel: CancellationToken) -> Result<()> {
        self.ws
            .send_json(serde_json::json!({ "inputText": { "text": text } }), cancel)
            .await
    }

    async fn send_tool_result(&self, result: ToolResult, cancel: CancellationToken) -> Result<()> {
        let content = result
            .content
            .iter()
            .map(|c| match c {
                ToolResultContent::Text(text) => serde_json::json!({ "text": text }),
                ToolResultContent::Structured(value) => value.clone(),
            })
            .collect::<Vec<_>>();

        self.ws
            .send_json(
                serde_json::json!({
                    "toolResult": {
                        "toolUseId": result.call_id,
                        "content": content,
                        "status": if result.is_error { "error" } else { "success" },
                    }
                }),
                cancel,
            )
            .await
    }

    async fn recv(&self) -> Option<SessionEvent> {
        self.ws.recv().await
    }

    async fn interrupt(&self, cancel: CancellationToken) -> Result<()> {
        self.ws
            .send_json(serde_json::json!({ "inputAudioInterrupt": {} }), cancel)
            .await
    }

    async fn close(&self) {
        self.ws.close().await;
    }
}

/// Decode one Nova/Bedrock server envelope into zero or more session events.
fn decode_envelope(value: &serde_json::Value) -> Vec<SessionEvent> {
    if let Some(delta) = value.get("contentBlockDelta").and_then(|d| d.get("delta")) {
        if let Some(b64) = delta.get("audioChunk").and_then(|v| v.as_str()) {
            return base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
                .map(|audio| vec![SessionEvent::AudioOutput { audio }])
                .unwrap_or_default();
        }
        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
            return vec![SessionEvent::TextOutput { text: text.to_string() }];
        }
        return Vec::new();
    }

    if let Some(text) = value.get("inputTranscript").and_then(|t| t.get("text")).and_then(|v| v.as_str()) {
        return vec![SessionEvent::Transcript { text: text.to_string() }];
    }

    if let Some(tool_use) = value.get("toolUse") {
        let id = tool_use.get("toolUseId").and_then(|v| v.as_str());
        let name = tool_use.get("name").and_then(|v| v.as_str());
        let input = tool_use.get("input");
        if let (Some(id), Some(name)) = (id, name) {
            return vec![SessionEvent::ToolCall(ToolCall {
                call_id: id.to_string(),
                name: name.to_string(),
                arguments: input.map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string()),
            })];
        }
        return Vec::new();
    }

    if value.get("contentBlockStop").is_some() || value.get("messageStop").is_some() {
        return vec![SessionEvent::TurnEnd];
    }

    if let Some(message) = value.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()) {
        return vec![SessionEvent::Error { message: message.to_string() }];
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_audio_delta() {
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"pcm");
        let value = serde_json::json!({ "contentBlockDelta": { "delta": { "audioChunk": b64 } } });
        let events = decode_envelope(&value);
        assert!(matches!(&events[0], SessionEvent::AudioOutput { audio } if audio == b"pcm"));
    }

    #[test]
    fn decodes_transcript() {
        let value = serde_json::json!({ "inputTranscript": { "text": "hi there" } });
        let events = decode_envelope(&value);
        assert!(matches!(&events[0], SessionEvent::Transcript { text } if text == "hi there"));
    }

    #[test]
    fn decodes_tool_use() {
        let value = serde_json::json!({
            "toolUse": { "toolUseId": "t1", "name": "search", "input": { "q": "rust" } }
        });
        let events = decode_envelope(&value);
        assert!(matches!(&events[0], SessionEvent::ToolCall(c) if c.name == "search"));
    }

    #[test]
    fn decodes_turn_end_from_message_stop() {
        let value = serde_json::json!({ "messageStop": { "stopReason": "end_turn" } });
        let events = decode_envelope(&value);
        assert!(matches!(events[0], SessionEvent::TurnEnd));
    }

    #[test]
    fn decodes_error() {
        let value = serde_json::json!({ "error": { "message": "throttled" } });
        let events = decode_envelope(&value);
        assert!(matches!(&events[0], SessionEvent::Error { message } if message == "throttled"));
    }
}
