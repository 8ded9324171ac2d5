//! Provider-agnostic speech-to-speech session protocol, vendor engines,
//! failover manager, and frame-processor adapter.
//!
//! Callers interact with three layers: the [`registry`] to construct a
//! named [`session::Engine`], the [`session::Session`] it hands back for
//! `send_audio`/`send_text`/`recv`, and optionally the [`adapter`] to
//! bridge a session into a generic typed-frame pipeline. [`manager`] wraps
//! several engines behind one `Engine` with automatic failover.

pub mod adapter;
pub mod config;
pub mod engines;
pub mod error;
pub mod manager;
pub mod registry;
pub mod session;

pub use config::{apply_options, EngineConfig, EngineOption, ToolCall, ToolDefinition, ToolResult, ToolResultContent};
pub use error::{ProviderError, Result};
pub use manager::ProviderManager;
pub use registry::{global as registry, register_builtin_providers, Registry};
pub use session::{Engine, HookSet, Hooks, Session, SessionEvent, SessionState};
