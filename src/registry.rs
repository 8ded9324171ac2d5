//! Provider Registry: a process-wide, named factory table for engines.
//!
//! Entries are added once at startup and looked up frequently and
//! concurrently thereafter.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::{ProviderError, Result};
use crate::session::Engine;

/// Constructs an [`Engine`] from an [`EngineConfig`].
///
/// Implemented by each vendor module (`engines::openai::OpenAiFactory`,
/// etc.) and registered once under a string id.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Build an engine from the given config. Errors from the underlying
    /// constructor are propagated unchanged.
    async fn build(&self, config: EngineConfig) -> Result<Box<dyn Engine>>;
}

/// Named factory table mapping a provider id to a constructor.
///
/// Reads are frequent and concurrent; writes are rare and happen during
/// startup — backed by an `RwLock` rather than a `Mutex`.
#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<String, Arc<dyn EngineFactory>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory under `id`.
    ///
    /// Fails with [`ProviderError::Registration`] if `id` is empty or
    /// already registered. Double-registration is a programming error, not
    /// a runtime condition to recover from.
    pub fn register(&self, id: impl Into<String>, factory: Arc<dyn EngineFactory>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProviderError::Registration(
                "provider id must not be empty".into(),
            ));
        }

        let mut factories = self.factories.write().expect("registry lock poisoned");
        if factories.contains_key(&id) {
            return Err(ProviderError::Registration(format!(
                "provider {id:?} is already registered"
            )));
        }
        factories.insert(id, factory);
        Ok(())
    }

    /// Construct an engine for `id`, or [`ProviderError::UnknownProvider`]
    /// if nothing is registered under it.
    pub async fn new(&self, id: &str, config: EngineConfig) -> Result<Box<dyn Engine>> {
        let factory = {
            let factories = self.factories.read().expect("registry lock poisoned");
            factories.get(id).cloned()
        };
        match factory {
            Some(factory) => factory.build(config).await,
            None => Err(ProviderError::UnknownProvider(id.to_string())),
        }
    }

    /// List registered ids in sorted order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let factories = self.factories.read().expect("registry lock poisoned");
        let mut ids: Vec<String> = factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// The process-wide registry instance.
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Access the process-wide registry, creating it on first use.
pub fn global() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Register the three shipped vendor engines (`openai_realtime`,
/// `gemini_live`, `nova`) on the process-wide registry, exactly once.
///
/// Rust has no implicit init-time side effects, so callers must invoke this
/// explicitly before resolving a builtin provider by id — typically once,
/// near the start of `main`.
pub fn register_builtin_providers() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let registry = global();
        let _ = registry.register(
            "openai_realtime",
            Arc::new(crate::engines::openai::OpenAiFactory),
        );
        let _ = registry.register(
            "gemini_live",
            Arc::new(crate::engines::gemini::GeminiFactory),
        );
        let _ = registry.register("nova", Arc::new(crate::engines::nova::NovaFactory));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use tokio_util::sync::CancellationToken;

    struct NoopSession;

    #[async_trait]
    impl Session for NoopSession {
        async fn send_audio(&self, _audio: Vec<u8>, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn send_text(&self, _text: String, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn send_tool_result(
            &self,
            _result: crate::config::ToolResult,
            _cancel: CancellationToken,
        ) -> Result<()> {
            Ok(())
        }
        async fn recv(&self) -> Option<crate::session::SessionEvent> {
            None
        }
        async fn interrupt(&self, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    struct NoopEngine;

    #[async_trait]
    impl Engine for NoopEngine {
        fn provider_id(&self) -> &str {
            "noop"
        }
        async fn start(
            &self,
            _options: Vec<crate::config::EngineOption>,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn Session>> {
            Ok(Box::new(NoopSession))
        }
    }

    struct NoopFactory;

    #[async_trait]
    impl EngineFactory for NoopFactory {
        async fn build(&self, _config: EngineConfig) -> Result<Box<dyn Engine>> {
            Ok(Box::new(NoopEngine))
        }
    }

    #[test]
    fn register_then_list_contains_id() {
        let registry = Registry::new();
        registry.register("x", Arc::new(NoopFactory)).unwrap();
        assert_eq!(registry.list(), vec!["x".to_string()]);
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        registry.register("x", Arc::new(NoopFactory)).unwrap();
        let err = registry.register("x", Arc::new(NoopFactory)).unwrap_err();
        assert!(matches!(err, ProviderError::Registration(_)));
    }

    #[test]
    fn empty_id_fails() {
        let registry = Registry::new();
        let err = registry.register("", Arc::new(NoopFactory)).unwrap_err();
        assert!(matches!(err, ProviderError::Registration(_)));
    }

    #[tokio::test]
    async fn unknown_provider_is_reported() {
        let registry = Registry::new();
        let err = registry
            .new("missing", EngineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(id) if id == "missing"));
    }

    #[tokio::test]
    async fn new_delegates_to_factory() {
        let registry = Registry::new();
        registry.register("x", Arc::new(NoopFactory)).unwrap();
        let engine = registry.new("x", EngineConfig::default()).await.unwrap();
        assert_eq!(engine.provider_id(), "noop");
    }

    #[test]
    fn list_is_sorted() {
        let registry = Registry::new();
        registry.register("zebra", Arc::new(NoopFactory)).unwrap();
        registry.register("alpha", Arc::new(NoopFactory)).unwrap();
        assert_eq!(registry.list(), vec!["alpha".to_string(), "zebra".to_string()]);
    }
}
