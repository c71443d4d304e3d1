//! Bounded cache of opaque nonces.
//!
//! Authentication front-ends (Digest, one-time upload links) hand out
//! nonces and later need to know whether one is still valid. The cache
//! holds at most `capacity` nonces, evicting the least recently used, and
//! every nonce expires `ttl` after it was issued.
//!
//! A nonce can be bound to a scope, usually a user name. It then only
//! validates together with that same scope.
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 4096;

// scope and nonce, NUL separated.
fn key(scope: &str, nonce: &str) -> String {
    format!("{scope}\0{nonce}")
}

#[derive(Debug)]
pub struct NonceCache {
    ttl: Duration,
    cache: Mutex<LruCache<String, Instant>>,
}

impl NonceCache {
    /// A capacity of zero is rounded up to one.
    pub fn new(capacity: usize, ttl: Duration) -> NonceCache {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        NonceCache {
            ttl,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Issue and remember a fresh nonce.
    pub fn issue(&self) -> String {
        self.issue_for("")
    }

    /// Issue a nonce that is only valid for `scope`.
    pub fn issue_for(&self, scope: &str) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.cache.lock().put(key(scope, &nonce), Instant::now());
        nonce
    }

    /// Is `nonce` known and not expired. Expired nonces are dropped.
    pub fn validate(&self, nonce: &str) -> bool {
        self.validate_for("", nonce)
    }

    /// Like [`NonceCache::validate`], for a nonce issued to `scope`.
    pub fn validate_for(&self, scope: &str, nonce: &str) -> bool {
        let k = key(scope, nonce);
        let mut cache = self.cache.lock();
        match cache.get(&k) {
            Some(issued) if issued.elapsed() < self.ttl => true,
            Some(_) => {
                trace!("nonce {nonce} expired");
                cache.pop(&k);
                false
            }
            None => false,
        }
    }

    /// Forget a nonce, for one-shot use.
    pub fn consume(&self, nonce: &str) -> bool {
        let valid = self.validate(nonce);
        self.cache.lock().pop(&key("", nonce));
        valid
    }

    /// Drop all expired nonces.
    pub fn purge(&self) {
        let mut cache = self.cache.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, issued)| issued.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            cache.pop(&k);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        NonceCache::new(DEFAULT_CAPACITY, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_validate() {
        let nc = NonceCache::default();
        let n = nc.issue();
        assert!(nc.validate(&n));
        assert!(!nc.validate("bogus"));
        assert!(nc.consume(&n));
        assert!(!nc.validate(&n));
    }

    #[test]
    fn scoped() {
        let nc = NonceCache::default();
        let n = nc.issue_for("alice");
        assert!(nc.validate_for("alice", &n));
        assert!(!nc.validate_for("bob", &n));
        assert!(!nc.validate(&n));
    }

    #[test]
    fn bounded() {
        let nc = NonceCache::new(2, Duration::from_secs(60));
        let a = nc.issue();
        let _b = nc.issue();
        let _c = nc.issue();
        assert_eq!(nc.len(), 2);
        assert!(!nc.validate(&a));
    }

    #[test]
    fn expires() {
        let nc = NonceCache::new(8, Duration::ZERO);
        let n = nc.issue();
        assert!(!nc.validate(&n));
        assert!(nc.is_empty());
        nc.issue();
        nc.purge();
        assert!(nc.is_empty());
    }
}
