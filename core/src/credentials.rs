//! Credential collaborator and the shared access-token cache.
//!
//! # Design
//! Token bookkeeping lives in one [`TokenCache`] keyed by
//! `(generation, credential scope)` rather than being repeated per
//! generation. Several applications (scopes) can share one process without
//! seeing each other's tokens. Issuing tokens is the job of a
//! [`TokenSource`]; the cache only remembers them until shortly before they
//! expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{BridgeError, Result};
use crate::types::ApiGeneration;

/// Supplies what the call adapters need to authenticate.
pub trait CredentialProvider: Send + Sync {
    /// Bearer token for `generation`. `force_refresh` bypasses any cache.
    fn access_token(&self, generation: ApiGeneration, force_refresh: bool) -> Result<String>;

    /// HMAC key for signed methods.
    fn signing_secret(&self) -> Result<String>;

    fn app_key(&self) -> String;
}

/// Fixed credentials, for hosts that manage tokens elsewhere and for tests.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub access_token: String,
}

impl StaticCredentials {
    pub fn new(app_key: &str, app_secret: &str, access_token: &str) -> Self {
        Self {
            app_key: app_key.to_string(),
            app_secret: app_secret.to_string(),
            access_token: access_token.to_string(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn access_token(&self, _generation: ApiGeneration, _force_refresh: bool) -> Result<String> {
        Ok(self.access_token.clone())
    }

    fn signing_secret(&self) -> Result<String> {
        Ok(self.app_secret.clone())
    }

    fn app_key(&self) -> String {
        self.app_key.clone()
    }
}

/// A freshly issued token and its lifetime.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: Duration,
}

/// Obtains tokens from the vendor's token endpoint (or anywhere else).
pub trait TokenSource: Send + Sync {
    fn fetch(&self, generation: ApiGeneration, scope: &str) -> Result<IssuedToken>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Tokens keyed by `(generation, scope)`.
#[derive(Debug)]
pub struct TokenCache {
    entries: Mutex<HashMap<(ApiGeneration, String), CachedToken>>,
    refresh_margin: chrono::Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl TokenCache {
    /// Tokens are treated as expired `refresh_margin` before their deadline.
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    pub fn get(&self, generation: ApiGeneration, scope: &str, now: DateTime<Utc>) -> Option<String> {
        let entries = self.entries.lock();
        let cached = entries.get(&(generation, scope.to_string()))?;
        (cached.expires_at - self.refresh_margin > now).then(|| cached.token.clone())
    }

    pub fn store(&self, generation: ApiGeneration, scope: &str, token: &str, expires_at: DateTime<Utc>) {
        self.entries.lock().insert(
            (generation, scope.to_string()),
            CachedToken {
                token: token.to_string(),
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, generation: ApiGeneration, scope: &str) {
        self.entries.lock().remove(&(generation, scope.to_string()));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`CredentialProvider`] that caches tokens from a [`TokenSource`].
pub struct CachedCredentials<S> {
    source: S,
    cache: Arc<TokenCache>,
    clock: Arc<dyn Clock>,
    scope: String,
    app_key: String,
    app_secret: String,
}

impl<S: TokenSource> CachedCredentials<S> {
    /// `scope` identifies the application; it is usually the app key.
    pub fn new(source: S, cache: Arc<TokenCache>, clock: Arc<dyn Clock>, app_key: &str, app_secret: &str) -> Self {
        Self {
            source,
            cache,
            clock,
            scope: app_key.to_string(),
            app_key: app_key.to_string(),
            app_secret: app_secret.to_string(),
        }
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }
}

impl<S: TokenSource> CredentialProvider for CachedCredentials<S> {
    fn access_token(&self, generation: ApiGeneration, force_refresh: bool) -> Result<String> {
        let generation = generation.concrete()?;
        let now = self.clock.now();
        if !force_refresh {
            if let Some(token) = self.cache.get(generation, &self.scope, now) {
                return Ok(token);
            }
        }
        let issued = self.source.fetch(generation, &self.scope)?;
        let lifetime = chrono::Duration::from_std(issued.expires_in)
            .map_err(|e| BridgeError::Configuration(format!("token lifetime out of range: {e}")))?;
        self.cache.store(generation, &self.scope, &issued.token, now + lifetime);
        tracing::debug!(%generation, scope = %self.scope, "access token refreshed");
        Ok(issued.token)
    }

    fn signing_secret(&self) -> Result<String> {
        Ok(self.app_secret.clone())
    }

    fn app_key(&self) -> String {
        self.app_key.clone()
    }
}
