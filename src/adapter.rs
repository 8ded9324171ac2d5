//! Frame-Processor Adapter: bridges a [`Session`] to a generic duplex
//! typed-frame pipeline.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ToolResult;
use crate::error::{ProviderError, Result};
use crate::session::{HookSet, Session, SessionEvent};

/// Sample rate annotation for [`Frame::Audio`] frames produced from
/// [`SessionEvent::AudioOutput`]. All three vendor engines emit 24 kHz
/// PCM16 downstream audio.
pub const ADAPTER_OUTPUT_SAMPLE_RATE_HZ: u32 = 24_000;

/// A control signal carried by [`Frame::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// The caller is barging in; the model should stop speaking.
    Interrupt,
    /// The model has finished its response turn.
    EndOfUtterance,
}

/// A typed frame flowing through the duplex pipeline.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Audio bytes, annotated with their sample rate.
    Audio {
        /// PCM16 audio bytes.
        bytes: Vec<u8>,
        /// Sample rate in Hz.
        sample_rate_hz: u32,
    },
    /// A text frame.
    Text(String),
    /// An out-of-band control signal.
    Control(ControlSignal),
}

/// Bridges a [`Session`] to an input/output pair of typed frames.
///
/// `Audio` frames in become `send_audio`; `Text` frames in become
/// `send_text`; `Control(Interrupt)` frames in become `interrupt`; any other
/// control signal received on the input side is ignored (there is currently
/// only one inbound-meaningful signal, `Interrupt`).
pub struct FrameProcessor {
    session: Box<dyn Session>,
    hooks: HookSet,
}

impl FrameProcessor {
    /// Wrap an already-started session. No hooks are attached; use
    /// [`with_hooks`](Self::with_hooks) to attach some.
    #[must_use]
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            session,
            hooks: HookSet::new(),
        }
    }

    /// Attach a [`HookSet`] whose callbacks fire as this processor observes
    /// session events and forwards interrupts.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the duplex bridge until either channel closes or a fatal error
    /// event is observed. `input` carries caller-originated frames;
    /// `output` carries frames translated from session events.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<Frame>,
        output: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.session.close().await;
                    return Ok(());
                }

                frame = input.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(err) = self.handle_input_frame(frame, cancel.clone()).await {
                                warn!(error = %err, "frame processor: input frame failed");
                            }
                        }
                        None => {
                            // Input side closed — drain remaining events then exit.
                            self.session.close().await;
                            return Ok(());
                        }
                    }
                }

                event = self.session.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(terminal_err) = self.handle_session_event(event, &output).await {
                                return Err(terminal_err);
                            }
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_input_frame(&self, frame: Frame, cancel: CancellationToken) -> Result<()> {
        match frame {
            Frame::Audio { bytes, .. } => self.session.send_audio(bytes, cancel).await,
            Frame::Text(text) => self.session.send_text(text, cancel).await,
            Frame::Control(ControlSignal::Interrupt) => {
                self.session.interrupt(cancel).await?;
                self.hooks.fire_interrupt();
                Ok(())
            }
            Frame::Control(_) => {
                debug!("frame processor: ignoring unhandled control signal");
                Ok(())
            }
        }
    }

    /// Returns `Some(err)` when a fatal error event should terminate the
    /// processor; `None` to keep running.
    async fn handle_session_event(
        &self,
        event: SessionEvent,
        output: &mpsc::Sender<Frame>,
    ) -> Option<ProviderError> {
        let frame = match event {
            SessionEvent::AudioOutput { audio } => Some(Frame::Audio {
                bytes: audio,
                sample_rate_hz: ADAPTER_OUTPUT_SAMPLE_RATE_HZ,
            }),
            SessionEvent::TextOutput { text } => Some(Frame::Text(text)),
            SessionEvent::Transcript { text } => Some(Frame::Text(text)),
            SessionEvent::TurnEnd => {
                self.hooks.fire_turn();
                Some(Frame::Control(ControlSignal::EndOfUtterance))
            }
            SessionEvent::ToolCall(call) => {
                // Tool-call round-tripping is handled by the caller through
                // the Session Protocol directly; the generic frame shape
                // has no typed slot for it. The hook still fires so
                // observers see every tool call the model makes.
                self.hooks.fire_tool_call(&call);
                None
            }
            SessionEvent::Error { message } => {
                let err = self.hooks.fire_error(ProviderError::Protocol(message));
                return Some(err);
            }
        };

        if let Some(frame) = frame {
            if output.send(frame).await.is_err() {
                debug!("frame processor: output channel closed");
            }
        }
        None
    }

    /// Convenience passthrough for delivering a tool result directly
    /// through the wrapped session (bypassing the generic `Frame` shape,
    /// which has no slot for tool calls — see `handle_session_event`).
    pub async fn send_tool_result(&self, result: ToolResult, cancel: CancellationToken) -> Result<()> {
        self.session.send_tool_result(result, cancel).await
    }
}
