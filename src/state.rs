//! Application state shared across all HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenSet;
use crate::config::ServerConfig;
use crate::engine::Engine;

/// Shared application state passed to all handlers.
///
/// The engine handle is single-owner and shared immutably; the token set is
/// safe under concurrent mutation.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    engine: Arc<dyn Engine>,
    tokens: TokenSet,
    config: ServerConfig,
}

impl AppState {
    /// Assemble the shared state.
    pub fn new(engine: Arc<dyn Engine>, tokens: TokenSet, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(StateInner { engine, tokens, config }),
        }
    }

    /// The engine handle.
    pub fn engine(&self) -> &dyn Engine {
        self.inner.engine.as_ref()
    }

    /// The live ephemeral-token set.
    pub fn tokens(&self) -> &TokenSet {
        &self.inner.tokens
    }

    /// Static server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Lifetime of issued ephemeral tokens.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_millis(self.inner.config.ephemeral_token_ttl)
    }
}
