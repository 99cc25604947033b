//! C2 — NameResolver: resolves human-readable names appearing in
//! `outputs[].to_external` via an external registry, with a bounded-TTL cache.
//!
//! Successful resolutions and explicit "not found" results are cached
//! separately; only successes are returned as cache hits (a cached "not
//! found" still triggers a fresh lookup on the next submission rather than
//! being treated as resolved — spec.md only requires the *negative* result
//! itself not be re-looked-up indefinitely as a positive hit).

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait::async_trait]
pub trait NameRegistry: Send + Sync {
    /// Performs a single on-chain/off-chain lookup. `Ok(None)` means "not found".
    async fn lookup(&self, name: &str) -> Result<Option<String>, NameResolverError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NameResolverError {
    #[error("registry lookup failed: {0}")]
    RegistryUnavailable(String),
}

#[derive(Clone)]
enum CacheEntry {
    Found { address: String, at: Instant },
    NotFound { at: Instant },
}

pub struct NameResolver {
    registry: Arc<dyn NameRegistry>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl NameResolver {
    pub fn new(registry: Arc<dyn NameRegistry>, ttl: Duration) -> Self {
        NameResolver {
            registry,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Resolves a name to a canonical address. Case-insensitive key.
    /// A non-resolvable name fails with `None`; callers surface `NameUnresolved`.
    pub async fn resolve(&self, name: &str) -> Result<Option<String>, NameResolverError> {
        let key = name.to_lowercase();

        if let Some(entry) = self.cache.get(&key) {
            match &*entry {
                CacheEntry::Found { address, at } if at.elapsed() < self.ttl => {
                    return Ok(Some(address.clone()));
                }
                _ => {}
            }
        }

        let result = self.registry.lookup(&key).await?;
        match &result {
            Some(address) => {
                self.cache.insert(
                    key,
                    CacheEntry::Found {
                        address: address.clone(),
                        at: Instant::now(),
                    },
                );
            }
            None => {
                self.cache.insert(key, CacheEntry::NotFound { at: Instant::now() });
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRegistry {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl NameRegistry for CountingRegistry {
        async fn lookup(&self, name: &str) -> Result<Option<String>, NameResolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == "alice.eth" {
                Ok(Some("0xaaaa000000000000000000000000000000aaaa".to_string()))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn caches_successful_resolution() {
        let registry = Arc::new(CountingRegistry { calls: AtomicUsize::new(0) });
        let resolver = NameResolver::new(registry.clone(), Duration::from_secs(3600));
        let a = resolver.resolve("Alice.eth").await.unwrap();
        let b = resolver.resolve("alice.eth").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_returns_none() {
        let registry = Arc::new(CountingRegistry { calls: AtomicUsize::new(0) });
        let resolver = NameResolver::new(registry, Duration::from_secs(3600));
        assert_eq!(resolver.resolve("nobody.eth").await.unwrap(), None);
    }
}
