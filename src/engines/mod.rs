//! Shared WebSocket plumbing used by every vendor engine.
//!
//! Each vendor module (`openai`, `gemini`, `nova`) supplies its own
//! dial/configure/encode/decode logic for its wire format; this module
//! factors out the parts that are identical across vendors: the split
//! sink/source types, the bounded event channel, the read loop skeleton,
//! and cancellable sends.

pub mod gemini;
pub mod nova;
pub mod openai;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::session::{SessionEvent, SessionState};

/// Bounded event channel capacity — backpressures a fast producer against a
/// slow consumer instead of buffering without limit.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Dial a WebSocket endpoint built from an [`http::Request`], splitting the
/// resulting stream into independently-owned sink and source halves.
pub(crate) async fn dial(
    request: http::Request<()>,
    provider: &'static str,
) -> Result<(WsSink, WsSource)> {
    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ProviderError::start(provider, ProviderError::Network(e.to_string())))?;
    let (sink, source) = stream.split();
    Ok((sink, source))
}

/// Run `fut` to completion unless `cancel` fires first, in which case
/// return [`ProviderError::Cancelled`] immediately (the in-flight future is
/// dropped).
pub(crate) async fn cancellable<F, T>(fut: F, cancel: CancellationToken) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = fut => result,
    }
}

/// Shared duplex handle wrapping one live WebSocket connection.
///
/// Vendor `Session` impls hold one of these and layer their own
/// encode-on-send / decode-on-receive around it.
pub(crate) struct WsHandle {
    sink: Mutex<WsSink>,
    events: Mutex<mpsc::Receiver<SessionEvent>>,
    /// Set by `close()` before the socket is actually shut down, so the
    /// read loop can distinguish an explicit close from a real transport
    /// failure and skip emitting a spurious `Error` event.
    explicit_close: Arc<AtomicBool>,
    /// Cancelled by `close()` to unblock the read loop's socket read
    /// regardless of the caller-supplied `Start`-time cancellation token and
    /// regardless of whether the peer ever completes a close handshake.
    shutdown: CancellationToken,
    state: Arc<std::sync::Mutex<SessionState>>,
    provider: &'static str,
}

impl WsHandle {
    /// Spawn the read loop on a dedicated task and return a handle plus its
    /// join handle (kept by the caller only to avoid a detached-task lint;
    /// the loop manages its own shutdown).
    pub(crate) fn spawn(
        sink: WsSink,
        source: WsSource,
        decode: fn(&serde_json::Value) -> Vec<SessionEvent>,
        provider: &'static str,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let explicit_close = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let state = Arc::new(std::sync::Mutex::new(SessionState::Configuring));

        let join = tokio::spawn(read_loop(
            source,
            tx,
            decode,
            provider,
            explicit_close.clone(),
            cancel,
            shutdown.clone(),
            state.clone(),
        ));

        (
            Self {
                sink: Mutex::new(sink),
                events: Mutex::new(rx),
                explicit_close,
                shutdown,
                state,
                provider,
            },
            join,
        )
    }

    /// Serialize `value` and write it as a single text frame, respecting
    /// cancellation.
    pub(crate) async fn send_json(&self, value: serde_json::Value, cancel: CancellationToken) -> Result<()> {
        if self.explicit_close.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed);
        }
        cancellable(self.write_json(value), cancel).await
    }

    async fn write_json(&self, value: serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(&value)
            .map_err(|e| ProviderError::Protocol(format!("failed to encode envelope: {e}")))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    /// Receive the next event, or `None` once the channel has closed.
    pub(crate) async fn recv(&self) -> Option<SessionEvent> {
        let mut events = self.events.lock().await;
        events.recv().await
    }

    /// Current lifecycle state, for diagnostics/tests.
    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Mark the session ready once the vendor's setup/configure message has
    /// been sent successfully.
    pub(crate) fn mark_ready(&self) {
        *self.state.lock().expect("state lock poisoned") = SessionState::Ready;
    }

    /// Idempotent close: mark explicit-close, cancel the read loop's own
    /// shutdown signal so it unblocks even if the peer never completes a
    /// close handshake, then best-effort send a WebSocket close frame.
    /// Always succeeds.
    pub(crate) async fn close(&self) {
        if self.explicit_close.swap(true, Ordering::SeqCst) {
            return; // already closed
        }
        *self.state.lock().expect("state lock poisoned") = SessionState::Closing;
        self.shutdown.cancel();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(provider = self.provider, error = %e, "close: socket already gone");
        }
    }
}

/// Read-loop skeleton shared by every vendor: read a text frame, decode a
/// vendor envelope, publish zero or more events, repeat until the socket
/// closes, a cancellation fires, `close()` signals shutdown, or an
/// unrecoverable transport error occurs.
async fn read_loop(
    mut source: WsSource,
    tx: mpsc::Sender<SessionEvent>,
    decode: fn(&serde_json::Value) -> Vec<SessionEvent>,
    provider: &'static str,
    explicit_close: Arc<AtomicBool>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    state: Arc<std::sync::Mutex<SessionState>>,
) {
    'read: loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                // Clean shutdown: no spurious Error event.
                break 'read;
            }

            _ = shutdown.cancelled() => {
                // close() was called; unblock even if the peer never
                // completes its own close handshake.
                break 'read;
            }

            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) => {
                                for event in decode(&value) {
                                    if tx.send(event).await.is_err() {
                                        // Consumer dropped the receiver; nothing more to do.
                                        break 'read;
                                    }
                                }
                            }
                            Err(e) => {
                                // Malformed JSON: ignored rather than treated as fatal.
                                debug!(provider, error = %e, "read_loop: malformed JSON frame, ignoring");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(provider, "read_loop: ignoring unexpected binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        if !explicit_close.load(Ordering::SeqCst) {
                            let _ = tx.send(SessionEvent::Error {
                                message: format!("{provider}: connection closed by peer"),
                            }).await;
                        }
                        break 'read;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Frame — handled transparently by tungstenite; nothing to do.
                    }
                    Some(Err(e)) => {
                        if !explicit_close.load(Ordering::SeqCst) {
                            let _ = tx.send(SessionEvent::Error {
                                message: format!("{provider}: read error: {e}"),
                            }).await;
                        } else {
                            warn!(provider, error = %e, "read_loop: error after explicit close, suppressing");
                        }
                        break 'read;
                    }
                }
            }
        }
    }
    *state.lock().expect("state lock poisoned") = SessionState::Closed;
    // tx drops here, closing the channel exactly once.
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn noop_decode(_value: &serde_json::Value) -> Vec<SessionEvent> {
        Vec::new()
    }

    async fn dial_against_unresponsive_peer() -> (WsSink, WsSource, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Hold the connection open without ever sending a close frame —
            // the client's close() must still unblock its own read loop.
            std::future::pending::<()>().await;
            drop(ws);
        });

        let request = http::Request::builder()
            .uri(format!("ws://127.0.0.1:{port}"))
            .body(())
            .unwrap();
        let (sink, source) = dial(request, "test").await.unwrap();
        (sink, source, server)
    }

    #[tokio::test]
    async fn close_unblocks_read_loop_even_without_peer_close_handshake() {
        let (sink, source, server) = dial_against_unresponsive_peer().await;
        let (handle, read_task) =
            WsHandle::spawn(sink, source, noop_decode, "test", CancellationToken::new());

        assert_eq!(handle.state(), SessionState::Configuring);
        handle.mark_ready();
        assert_eq!(handle.state(), SessionState::Ready);

        handle.close().await;

        tokio::time::timeout(std::time::Duration::from_secs(2), read_task)
            .await
            .expect("read loop must terminate promptly after close()")
            .unwrap();

        assert_eq!(handle.state(), SessionState::Closed);
        assert!(handle.recv().await.is_none());

        server.abort();
    }
}
