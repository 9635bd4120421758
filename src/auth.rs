//! Bearer credentials and the live ephemeral-token set.
//!
//! The root endpoint trades the long-lived access token for an ephemeral
//! UUID token. Issued tokens live in a concurrent set from issuance until
//! TTL expiry (a spawned timer removes them) or explicit revocation, which
//! also cancels the timer.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// The set of currently-valid ephemeral tokens.
///
/// Cloning is cheap; all clones share one set.
#[derive(Debug, Clone, Default)]
pub struct TokenSet {
    tokens: Arc<DashMap<String, AbortHandle>>,
}

impl TokenSet {
    /// Create an empty token set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token, valid for `ttl` from now.
    pub fn issue(&self, ttl: Duration) -> String {
        let token = Uuid::new_v4().to_string();
        let tokens = Arc::clone(&self.tokens);
        let expiring = token.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if tokens.remove(&expiring).is_some() {
                debug!(token_suffix = token_suffix(&expiring), "ephemeral token expired");
            }
        });
        self.tokens.insert(token.clone(), expiry.abort_handle());
        token
    }

    /// Whether `token` is currently valid.
    pub fn is_live(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    /// Remove a token before its TTL elapses, cancelling its expiry timer.
    pub fn revoke(&self, token: &str) -> bool {
        match self.tokens.remove(token) {
            Some((_, expiry)) => {
                expiry.abort();
                debug!(token_suffix = token_suffix(token), "ephemeral token revoked");
                true
            }
            None => false,
        }
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when no tokens are live.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Last characters of a token, safe to log.
fn token_suffix(token: &str) -> &str {
    let start = token.len().saturating_sub(4);
    &token[start..]
}
