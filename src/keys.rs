//! Object Key Resolution
//!
//! Maps content to permanent storage keys and, on demand, to short-lived access
//! descriptors. Keys depend only on content: identical bytes uploaded from any
//! path on any device land under one key.

use crate::error::SyncError;
use crate::store::{AccessDescriptor, ObjectStore};
use crate::types::{Digest, ObjectKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default key namespace
pub const DEFAULT_PREFIX: &str = "objects";

/// Longest descriptor lifetime handed out by default
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(60 * 60);

pub struct ObjectKeyResolver {
    prefix: String,
    max_ttl: Duration,
    store: Arc<dyn ObjectStore>,
}

impl ObjectKeyResolver {
    pub fn new(prefix: impl Into<String>, max_ttl: Duration, store: Arc<dyn ObjectStore>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            prefix,
            max_ttl,
            store,
        }
    }

    /// Resolver with the default prefix and ttl ceiling
    pub fn with_defaults(store: Arc<dyn ObjectStore>) -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_MAX_TTL, store)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Permanent key for `content_hash`: `<prefix>/sha256/<hh>/<hex>`
    ///
    /// `path` only labels the log line; it never influences the key.
    pub fn permanent_key_for(&self, content_hash: &Digest, path: &str) -> ObjectKey {
        let hex = content_hash.to_hex();
        let key = if self.prefix.is_empty() {
            format!("sha256/{}/{}", &hex[..2], hex)
        } else {
            format!("{}/sha256/{}/{}", self.prefix, &hex[..2], hex)
        };
        debug!(path, key = %key, "Resolved permanent key");
        ObjectKey::new(key)
    }

    /// Recover the content hash from a key produced by this resolver
    pub fn content_hash_of(&self, key: &ObjectKey) -> Option<Digest> {
        let rest = if self.prefix.is_empty() {
            key.as_str()
        } else {
            key.as_str()
                .strip_prefix(self.prefix.as_str())?
                .strip_prefix('/')?
        };
        let mut parts = rest.split('/');
        let (scheme, fanout, hex) = (parts.next()?, parts.next()?, parts.next()?);
        if scheme != "sha256" || parts.next().is_some() || !hex.starts_with(fanout) {
            return None;
        }
        hex.parse().ok()
    }

    /// Fresh access descriptor for `key`, valid for at most the configured ceiling
    ///
    /// Descriptors are never cached; callers request a new one after expiry.
    pub async fn access_descriptor_for(
        &self,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<AccessDescriptor, SyncError> {
        let ttl = ttl.min(self.max_ttl);
        self.store.presign(key, ttl).await
    }
}
