//! Session Protocol: the contract every provider engine implements.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineOption, ToolCall, ToolResult};
use crate::error::{ProviderError, Result};

/// One event emitted on a session's outbound channel.
///
/// Each event carries exactly one payload kind; variants are mutually
/// exclusive rather than optional fields on a shared struct.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Raw decoded audio bytes (PCM16 at the session's declared rate).
    AudioOutput {
        /// Decoded audio bytes.
        audio: Vec<u8>,
    },
    /// Incremental text (spoken-content transcript or direct text response).
    TextOutput {
        /// Text fragment.
        text: String,
    },
    /// Finalized transcription of the user's input audio.
    Transcript {
        /// Transcribed text.
        text: String,
    },
    /// The model has called a tool.
    ToolCall(ToolCall),
    /// The model has finished its current response turn.
    TurnEnd,
    /// A non-fatal protocol or transport error. The session may or may not
    /// still be usable afterward.
    Error {
        /// Human-readable message.
        message: String,
    },
}

/// Lifecycle state of a live session, tracked internally for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Dialing the WebSocket.
    Dialing,
    /// Sending the setup/session-update message.
    Configuring,
    /// Accepting sends and emitting events.
    Ready,
    /// `close` has been called; draining in progress.
    Closing,
    /// Fully terminated; the event channel is closed.
    Closed,
}

/// A live duplex connection to exactly one provider engine.
///
/// All operations accept a [`CancellationToken`] except [`Session::recv`]
/// (which only ends when the channel closes) and [`Session::close`] (which
/// is independent of cancellation and always succeeds).
#[async_trait]
pub trait Session: Send + Sync {
    /// Append an audio chunk to the input buffer. Must not block beyond the
    /// underlying socket write. Fails with [`ProviderError::Closed`] if the
    /// session is closed.
    async fn send_audio(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<()>;

    /// Submit a user text message and trigger a response generation.
    async fn send_text(&self, text: String, cancel: CancellationToken) -> Result<()>;

    /// Deliver the output of a tool the model previously called.
    async fn send_tool_result(&self, result: ToolResult, cancel: CancellationToken) -> Result<()>;

    /// Receive the next session event, or `None` once the channel has
    /// closed (terminal — never returns `Some` again afterward).
    async fn recv(&self) -> Option<SessionEvent>;

    /// Signal that the user has barged in and the model should stop
    /// speaking. A successful no-op is valid for providers whose VAD
    /// handles interruption server-side.
    async fn interrupt(&self, cancel: CancellationToken) -> Result<()>;

    /// Terminate the session. Idempotent; safe to call concurrently with
    /// any other operation. Always succeeds.
    async fn close(&self);
}

/// A provider-specific implementation of the Session Protocol; a factory
/// for [`Session`]s.
#[async_trait]
pub trait Engine: Send + Sync {
    /// The registry id this engine was constructed under (e.g.
    /// `"openai_realtime"`).
    fn provider_id(&self) -> &str;

    /// Open a session. Options override config fields for this call only.
    /// On failure no task is left running and no socket remains open.
    async fn start(
        &self,
        options: Vec<EngineOption>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Session>>;
}

/// Observer callbacks a caller can attach to a session's lifecycle.
///
/// Default methods are no-ops so implementors only override what they need.
/// A [`HookSet`] composes several of these; it's wired into
/// [`FrameProcessor`](crate::adapter::FrameProcessor), which fires the
/// matching hook whenever it translates a [`SessionEvent`] or forwards an
/// [`interrupt`](Session::interrupt) call.
pub trait Hooks: Send + Sync {
    /// Called when a turn ends.
    fn on_turn(&self) {}
    /// Called when an interrupt is issued.
    fn on_interrupt(&self) {}
    /// Called when the model requests a tool call.
    fn on_tool_call(&self, _call: &ToolCall) {}
    /// Called when an error event is observed. Returning `Some` replaces
    /// the error seen by the next hook (and ultimately the caller);
    /// returning `None` passes the original error through.
    fn on_error(&self, _err: &ProviderError) -> Option<ProviderError> {
        None
    }
}

/// Composes multiple [`Hooks`] into one by sequencing.
///
/// `on_error` composition short-circuits on the first hook that returns a
/// replacement error; otherwise the original error is returned unchanged
/// after every hook has run.
#[derive(Default)]
pub struct HookSet {
    hooks: Vec<Box<dyn Hooks>>,
}

impl HookSet {
    /// Create an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook, composed after any already present.
    #[must_use]
    pub fn with(mut self, hook: Box<dyn Hooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Fire `on_turn` on every composed hook, in order.
    pub fn fire_turn(&self) {
        for hook in &self.hooks {
            hook.on_turn();
        }
    }

    /// Fire `on_interrupt` on every composed hook, in order.
    pub fn fire_interrupt(&self) {
        for hook in &self.hooks {
            hook.on_interrupt();
        }
    }

    /// Fire `on_tool_call` on every composed hook, in order.
    pub fn fire_tool_call(&self, call: &ToolCall) {
        for hook in &self.hooks {
            hook.on_tool_call(call);
        }
    }

    /// Fire `on_error` across every composed hook, short-circuiting on the
    /// first replacement and otherwise returning `original` unchanged.
    #[must_use]
    pub fn fire_error(&self, original: ProviderError) -> ProviderError {
        for hook in &self.hooks {
            if let Some(replacement) = hook.on_error(&original) {
                return replacement;
            }
        }
        original
    }
}
