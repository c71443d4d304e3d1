//! Simple in-memory locksystem.
//!
//! This implementation has state - if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemLs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemLs struct is just a handle, cloning is cheap.
//!
//! Granting a lock checks for conflicts and inserts the new lock while
//! holding the map's mutex, so two concurrent LOCK requests on the same
//! path cannot both be granted.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future;
use http::StatusCode;
use parking_lot::Mutex;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::ls::*;

/// Ephemeral in-memory LockSystem.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<Mutex<HashMap<String, DavLock>>>);

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs(Arc::new(Mutex::new(HashMap::new()))))
    }

    fn conflicts(
        map: &HashMap<String, DavLock>,
        path: &DavPath,
        lock_type: LockType,
        recursive: bool,
        now: SystemTime,
    ) -> bool {
        let mut held = locks_for_path(map.values(), path, now);
        if recursive {
            held.extend(
                map.values()
                    .filter(|l| path.is_ancestor_of(&l.path) && l.is_active_at(now))
                    .cloned(),
            );
        }
        !compatible(&held, lock_type)
    }
}

impl DavLockSystem for MemLs {
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        lock_type: LockType,
        owner: Option<&'a Element>,
        principal: Option<&'a str>,
        recursive: bool,
        timeout: Duration,
    ) -> LsFuture<'a, LockResult> {
        let mut map = self.0.lock();
        let now = SystemTime::now();
        // expired locks are swept here, nothing else shrinks the map.
        map.retain(|_, l| l.is_active_at(now));
        if Self::conflicts(&map, path, lock_type, recursive, now) {
            debug!("lock {path:?} ({lock_type:?}) refused: conflicting lock");
            return Box::pin(future::ready(Ok(Err(StatusCode::LOCKED))));
        }
        let lock = DavLock::new(path, lock_type, owner, principal, recursive, timeout);
        debug!("lock {} created on {:?}", lock.token, path);
        map.insert(lock.token.clone(), lock.clone());
        Box::pin(future::ready(Ok(Ok(lock))))
    }

    fn refresh<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        timeout: Duration,
    ) -> LsFuture<'a, LockResult> {
        let mut map = self.0.lock();
        let token = token_id(token);
        let found = map
            .get(token)
            .filter(|l| l.is_active() && l.applies_to(path))
            .is_some();
        if !found {
            debug!("refresh lock {token} on {path:?}: no such lock");
            return Box::pin(future::ready(Ok(Err(StatusCode::PRECONDITION_FAILED))));
        }
        // replace in place: remove, then re-insert with the new timeout.
        let res = match map.remove(token) {
            Some(mut lock) => {
                lock.timeout = timeout;
                lock.issued = SystemTime::now();
                map.insert(lock.token.clone(), lock.clone());
                Ok(lock)
            }
            None => Err(StatusCode::PRECONDITION_FAILED),
        };
        Box::pin(future::ready(Ok(res)))
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> LsFuture<'a, StatusCode> {
        let mut map = self.0.lock();
        let token = token_id(token);
        let status = match map.get(token) {
            Some(l) if l.is_active() && l.applies_to(path) => {
                map.remove(token);
                debug!("unlock {token} on {path:?}");
                StatusCode::NO_CONTENT
            }
            _ => StatusCode::CONFLICT,
        };
        Box::pin(future::ready(Ok(status)))
    }

    fn discover<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, Vec<DavLock>> {
        let map = self.0.lock();
        let locks = locks_for_path(map.values(), path, SystemTime::now());
        Box::pin(future::ready(Ok(locks)))
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, ()> {
        let mut map = self.0.lock();
        map.retain(|_, l| !path.is_ancestor_or_self(&l.path));
        Box::pin(future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    async fn lock(ls: &MemLs, path: &str, t: LockType, recursive: bool) -> LockResult {
        ls.lock(&p(path), t, None, None, recursive, Duration::ZERO)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn recursive_lock_is_visible_below() {
        let ls = MemLs::new();
        let l = lock(&ls, "/a", LockType::Exclusive, true).await.unwrap();
        let found = ls.discover(&p("/a/b/c")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token, l.token);

        // a depth-0 lock does not propagate.
        let ls = MemLs::new();
        lock(&ls, "/a", LockType::Exclusive, false).await.unwrap();
        assert!(ls.discover(&p("/a/b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exclusive_blocks_everything() {
        let ls = MemLs::new();
        lock(&ls, "/a", LockType::Exclusive, true).await.unwrap();
        for t in [LockType::Exclusive, LockType::Shared] {
            assert_eq!(lock(&ls, "/a", t, false).await.unwrap_err(), StatusCode::LOCKED);
            assert_eq!(lock(&ls, "/a/b", t, false).await.unwrap_err(), StatusCode::LOCKED);
        }
        // unrelated path is fine.
        assert!(lock(&ls, "/ab", LockType::Exclusive, false).await.is_ok());
    }

    #[tokio::test]
    async fn shared_locks_stack() {
        let ls = MemLs::new();
        assert!(lock(&ls, "/s", LockType::Shared, false).await.is_ok());
        assert!(lock(&ls, "/s", LockType::Shared, false).await.is_ok());
        assert_eq!(ls.discover(&p("/s")).await.unwrap().len(), 2);
        assert_eq!(
            lock(&ls, "/s", LockType::Exclusive, false).await.unwrap_err(),
            StatusCode::LOCKED
        );

        let ls = MemLs::new();
        lock(&ls, "/e", LockType::Exclusive, false).await.unwrap();
        assert_eq!(
            lock(&ls, "/e", LockType::Shared, false).await.unwrap_err(),
            StatusCode::LOCKED
        );
    }

    #[tokio::test]
    async fn recursive_request_sees_descendants() {
        let ls = MemLs::new();
        lock(&ls, "/a/b", LockType::Exclusive, false).await.unwrap();
        assert_eq!(
            lock(&ls, "/a", LockType::Exclusive, true).await.unwrap_err(),
            StatusCode::LOCKED
        );
        assert!(lock(&ls, "/a", LockType::Exclusive, false).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_and_unlock() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/r"), LockType::Exclusive, None, None, true, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let r = ls
            .refresh(&p("/r/child"), &l.urn(), Duration::from_secs(600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.token, l.token);
        assert_eq!(r.timeout, Duration::from_secs(600));

        let bad = ls.refresh(&p("/r"), "urn:uuid:nope", Duration::ZERO).await.unwrap();
        assert_eq!(bad.unwrap_err(), StatusCode::PRECONDITION_FAILED);

        assert_eq!(ls.unlock(&p("/other"), &l.token).await.unwrap(), StatusCode::CONFLICT);
        assert_eq!(ls.unlock(&p("/r"), &l.token).await.unwrap(), StatusCode::NO_CONTENT);
        assert_eq!(ls.unlock(&p("/r"), &l.token).await.unwrap(), StatusCode::CONFLICT);
        assert!(ls.discover(&p("/r")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_locks_are_ignored() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/t"), LockType::Exclusive, None, None, false, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        ls.0.lock().get_mut(&l.token).unwrap().issued = SystemTime::now() - Duration::from_secs(5);
        assert!(ls.discover(&p("/t")).await.unwrap().is_empty());
        let l2 = lock(&ls, "/t", LockType::Exclusive, false).await.unwrap();

        // the new grant swept the expired one.
        let map = ls.0.lock();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&l2.token));
    }

    #[tokio::test]
    async fn delete_drops_subtree() {
        let ls = MemLs::new();
        lock(&ls, "/d/x", LockType::Exclusive, false).await.unwrap();
        lock(&ls, "/dd", LockType::Exclusive, false).await.unwrap();
        ls.delete(&p("/d")).await.unwrap();
        assert!(ls.discover(&p("/d/x")).await.unwrap().is_empty());
        assert_eq!(ls.discover(&p("/dd")).await.unwrap().len(), 1);
    }
}
