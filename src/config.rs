//! Engine configuration, tool definitions, and functional options.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Static parameters for constructing an engine, overridable per-`start`
/// via [`EngineOption`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Voice id (vendor-specific, e.g. `"alloy"`).
    pub voice: Option<String>,
    /// Model id (vendor-specific, e.g. `"gpt-4o-realtime-preview"`).
    pub model: Option<String>,
    /// System prompt / instructions.
    pub instructions: Option<String>,
    /// Tool definitions available to the model this session.
    pub tools: Vec<ToolDefinition>,
    /// Audio sample rate in Hz (applies to both directions unless a vendor
    /// distinguishes upstream/downstream rates internally).
    pub sample_rate_hz: u32,
    /// Open-ended provider-specific fields (`api_key`, `region`,
    /// `base_url`, AWS credentials, …). Only the keys each engine actually
    /// recognizes are documented per-vendor; unrecognized keys are ignored.
    pub extras: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice: None,
            model: None,
            instructions: None,
            tools: Vec::new(),
            sample_rate_hz: 16_000,
            extras: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Look up a recognized `extras` key.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }
}

/// A function the model may call, described once at config time and
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name, unique within a single [`EngineConfig`].
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON-schema input specification.
    pub input_schema: serde_json::Value,
}

/// A tool call emitted by the model (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id, echoed back in the matching [`ToolResult`].
    pub call_id: String,
    /// Function name.
    pub name: String,
    /// Raw JSON argument string, as received — not parsed by the core.
    pub arguments: String,
}

/// One piece of a [`ToolResult`]'s content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    /// Plain text content.
    Text(String),
    /// Structured JSON content.
    Structured(serde_json::Value),
}

/// The output of a tool the model previously called (client → server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlates with a prior [`ToolCall::call_id`].
    pub call_id: String,
    /// Ordered content parts.
    pub content: Vec<ToolResultContent>,
    /// Whether this result represents a tool execution error.
    pub is_error: bool,
}

/// A pure mutator over [`EngineConfig`], applied by [`apply_options`].
///
/// Options are associative; when two options target the same field, the
/// later one in the slice wins. Backed by `Arc<dyn Fn>` rather than
/// `FnOnce` so a [`ProviderManager`](crate::manager::ProviderManager) can
/// reuse the same logical call inputs across several failover attempts
/// without re-threading per-attempt closures.
#[derive(Clone)]
pub struct EngineOption(std::sync::Arc<dyn Fn(&mut EngineConfig) + Send + Sync>);

impl EngineOption {
    /// Wrap a closure as an option.
    pub fn new(f: impl Fn(&mut EngineConfig) + Send + Sync + 'static) -> Self {
        Self(std::sync::Arc::new(f))
    }

    /// Override the voice.
    #[must_use]
    pub fn with_voice(voice: impl Into<String>) -> Self {
        let voice = voice.into();
        Self::new(move |c| c.voice = Some(voice.clone()))
    }

    /// Override the model id.
    #[must_use]
    pub fn with_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(move |c| c.model = Some(model.clone()))
    }

    /// Override the system instructions.
    #[must_use]
    pub fn with_instructions(instructions: impl Into<String>) -> Self {
        let instructions = instructions.into();
        Self::new(move |c| c.instructions = Some(instructions.clone()))
    }

    /// Replace the tool definitions.
    #[must_use]
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self::new(move |c| c.tools = tools.clone())
    }

    /// Override the audio sample rate.
    #[must_use]
    pub fn with_sample_rate(hz: u32) -> Self {
        Self::new(move |c| c.sample_rate_hz = hz)
    }
}

/// Apply a sequence of options to a fresh config, left-to-right, last-wins
/// on field collisions.
#[must_use]
pub fn apply_options(mut config: EngineConfig, options: Vec<EngineOption>) -> EngineConfig {
    for option in options {
        (option.0)(&mut config);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_option_sets_only_its_field() {
        let base = EngineConfig::default();

        let voiced = apply_options(base.clone(), vec![EngineOption::with_voice("alloy")]);
        assert_eq!(voiced.voice.as_deref(), Some("alloy"));
        assert_eq!(voiced.model, base.model);
        assert_eq!(voiced.sample_rate_hz, base.sample_rate_hz);

        let modeled = apply_options(
            base.clone(),
            vec![EngineOption::with_model("gpt-4o-realtime-preview")],
        );
        assert_eq!(modeled.model.as_deref(), Some("gpt-4o-realtime-preview"));
        assert_eq!(modeled.voice, base.voice);

        let rated = apply_options(base.clone(), vec![EngineOption::with_sample_rate(24_000)]);
        assert_eq!(rated.sample_rate_hz, 24_000);
        assert_eq!(rated.voice, base.voice);
    }

    #[test]
    fn same_field_last_wins() {
        let config = apply_options(
            EngineConfig::default(),
            vec![
                EngineOption::with_voice("alloy"),
                EngineOption::with_voice("shimmer"),
            ],
        );
        assert_eq!(config.voice.as_deref(), Some("shimmer"));
    }

    #[test]
    fn extras_lookup() {
        let mut config = EngineConfig::default();
        config.extras.insert("api_key".into(), "sk-test".into());
        assert_eq!(config.extra("api_key"), Some("sk-test"));
        assert_eq!(config.extra("missing"), None);
    }
}
