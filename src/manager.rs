//! Provider Manager: ordered primary + fallback engines behind one
//! [`Engine`] surface, with transparent failover.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::EngineOption;
use crate::error::{ProviderError, Result};
use crate::session::{Engine, Session};

/// Wraps one primary engine and zero or more fallbacks behind the same
/// [`Engine`] surface.
///
/// On `start`, engines are tried in order, reusing the same options, until
/// one succeeds or the list is exhausted. An error is retried against the
/// next engine only when [`ProviderError::is_retryable`] returns `true` for
/// it; non-retryable errors (authentication, malformed input) are surfaced
/// immediately without failover.
pub struct ProviderManager {
    engines: Vec<Box<dyn Engine>>,
    /// Index of the engine used by the most recent successful `start`.
    /// `0` means the primary; `>0` means a fallback is in use.
    current: AtomicUsize,
}

impl ProviderManager {
    /// Construct a manager from a primary engine and an ordered list of
    /// fallbacks (possibly empty, in which case the manager behaves as a
    /// pure pass-through).
    #[must_use]
    pub fn new(primary: Box<dyn Engine>, fallbacks: Vec<Box<dyn Engine>>) -> Self {
        let mut engines = Vec::with_capacity(1 + fallbacks.len());
        engines.push(primary);
        engines.extend(fallbacks);
        Self {
            engines,
            current: AtomicUsize::new(0),
        }
    }

    /// The provider id of the engine currently in use (the last one to
    /// succeed a `start` call, or the primary if `start` has never been
    /// called).
    #[must_use]
    pub fn current_provider_name(&self) -> &str {
        let idx = self.current.load(Ordering::SeqCst);
        self.engines[idx].provider_id()
    }

    /// Whether the manager is currently using a fallback rather than the
    /// primary engine.
    #[must_use]
    pub fn is_using_fallback(&self) -> bool {
        self.current.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl Engine for ProviderManager {
    fn provider_id(&self) -> &str {
        self.current_provider_name()
    }

    async fn start(
        &self,
        options: Vec<EngineOption>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Session>> {
        let mut errors = Vec::new();

        for (idx, engine) in self.engines.iter().enumerate() {
            // `EngineOption` is `Clone` (backed by `Arc<dyn Fn>`) precisely
            // so each engine in the failover chain can be tried with the
            // same logical call inputs.
            let attempt_options: Vec<EngineOption> = options.clone();

            match engine.start(attempt_options, cancel.clone()).await {
                Ok(session) => {
                    self.current.store(idx, Ordering::SeqCst);
                    return Ok(session);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    errors.push(err);
                    if !retryable {
                        return Err(errors.pop().expect("just pushed"));
                    }
                    // Otherwise fall through and try the next engine.
                }
            }
        }

        Err(ProviderError::Start {
            provider: self.engines[0].provider_id().to_string(),
            source: Box::new(
                errors
                    .pop()
                    .unwrap_or_else(|| ProviderError::Config("no engines configured".into())),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolResult;
    use crate::session::SessionEvent;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct StubSession;

    #[async_trait]
    impl Session for StubSession {
        async fn send_audio(&self, _audio: Vec<u8>, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn send_text(&self, _text: String, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn send_tool_result(
            &self,
            _result: ToolResult,
            _cancel: CancellationToken,
        ) -> Result<()> {
            Ok(())
        }
        async fn recv(&self) -> Option<SessionEvent> {
            None
        }
        async fn interrupt(&self, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    struct StubEngine {
        id: &'static str,
        fail_with: Option<ProviderError>,
        called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Engine for StubEngine {
        fn provider_id(&self) -> &str {
            self.id
        }
        async fn start(
            &self,
            _options: Vec<EngineOption>,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn Session>> {
            self.called.store(true, Ordering::SeqCst);
            match &self.fail_with {
                Some(ProviderError::Authentication(msg)) => {
                    Err(ProviderError::Authentication(msg.clone()))
                }
                Some(ProviderError::Network(msg)) => Err(ProviderError::Network(msg.clone())),
                Some(_) | None => Ok(Box::new(StubSession)),
            }
        }
    }

    fn engine(id: &'static str, fail_with: Option<ProviderError>) -> (Box<dyn Engine>, Arc<AtomicBool>) {
        let called = Arc::new(AtomicBool::new(false));
        (
            Box::new(StubEngine {
                id,
                fail_with,
                called: called.clone(),
            }),
            called,
        )
    }

    #[tokio::test]
    async fn empty_fallback_list_is_pass_through() {
        let (primary, _) = engine("primary", None);
        let manager = ProviderManager::new(primary, Vec::new());
        assert!(!manager.is_using_fallback());
        manager
            .start(Vec::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(!manager.is_using_fallback());
        assert_eq!(manager.current_provider_name(), "primary");
    }

    #[tokio::test]
    async fn failover_on_transient_error() {
        let (primary, primary_called) =
            engine("primary", Some(ProviderError::Network("down".into())));
        let (fallback, fallback_called) = engine("fallback", None);
        let manager = ProviderManager::new(primary, vec![fallback]);

        manager
            .start(Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert!(primary_called.load(Ordering::SeqCst));
        assert!(fallback_called.load(Ordering::SeqCst));
        assert!(manager.is_using_fallback());
        assert_eq!(manager.current_provider_name(), "fallback");
    }

    #[tokio::test]
    async fn non_retryable_error_skips_failover() {
        let (primary, primary_called) = engine(
            "primary",
            Some(ProviderError::Authentication("bad key".into())),
        );
        let (fallback, fallback_called) = engine("fallback", None);
        let manager = ProviderManager::new(primary, vec![fallback]);

        let err = manager
            .start(Vec::new(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Authentication(_)));
        assert!(primary_called.load(Ordering::SeqCst));
        assert!(!fallback_called.load(Ordering::SeqCst));
        assert!(!manager.is_using_fallback());
    }

    #[tokio::test]
    async fn all_engines_exhausted_surfaces_last_error() {
        let (primary, _) = engine("primary", Some(ProviderError::Network("down".into())));
        let (fallback, _) = engine("fallback", Some(ProviderError::Network("also down".into())));
        let manager = ProviderManager::new(primary, vec![fallback]);

        let err = manager
            .start(Vec::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Start { .. }));
    }
}
