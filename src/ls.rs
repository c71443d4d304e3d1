//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures that borrow `self`
//! for longer than the call, so a locksystem can be shared freely
//! between requests.
//!
//! A lock applies to a path when it sits on the path itself, or when it
//! sits on a strict ancestor and is recursive (`Depth: infinity`).
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use http::StatusCode;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::errors::DavResult;

pub(crate) mod memls;
#[cfg(any(docsrs, feature = "sqlls"))]
pub(crate) mod sqlls;

/// Exclusive or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Exclusive,
    Shared,
}

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Lock id, without the `urn:uuid:` scheme.
    pub token: String,
    /// Path of the locked resource.
    pub path: DavPath,
    pub lock_type: LockType,
    /// `<D:owner>` element as submitted by the client.
    pub owner: Option<Element>,
    /// Principal that created the lock.
    pub principal: Option<String>,
    /// Does the lock extend to all descendants.
    pub recursive: bool,
    /// `Duration::ZERO` means infinite.
    pub timeout: Duration,
    pub issued: SystemTime,
}

/// Outcome of a lock or refresh: the lock, or the protocol status
/// (`423 Locked`, `412 Precondition Failed`, ...).
pub type LockResult = Result<DavLock, StatusCode>;

/// Future returned by the DavLockSystem methods.
pub type LsFuture<'a, T> = Pin<Box<dyn Future<Output = DavResult<T>> + Send + 'a>>;

impl DavLock {
    /// Create a fresh lock with a new unique token, issued now.
    pub fn new(
        path: &DavPath,
        lock_type: LockType,
        owner: Option<&Element>,
        principal: Option<&str>,
        recursive: bool,
        timeout: Duration,
    ) -> DavLock {
        DavLock {
            token: uuid::Uuid::new_v4().hyphenated().to_string(),
            path: path.clone(),
            lock_type,
            owner: owner.cloned(),
            principal: principal.map(|p| p.to_string()),
            recursive,
            timeout,
            issued: SystemTime::now(),
        }
    }

    /// Token in URN form, as used in `Lock-Token` and `<D:locktoken>`.
    pub fn urn(&self) -> String {
        format!("urn:uuid:{}", self.token)
    }

    /// `None` if the lock never expires, or expires beyond what
    /// `SystemTime` can represent.
    pub fn expires_at(&self) -> Option<SystemTime> {
        if self.timeout.is_zero() {
            None
        } else {
            self.issued.checked_add(self.timeout)
        }
    }

    pub fn is_active_at(&self, now: SystemTime) -> bool {
        match self.expires_at() {
            None => true,
            Some(t) => t > now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(SystemTime::now())
    }

    /// Does this lock make `path` locked.
    pub fn applies_to(&self, path: &DavPath) -> bool {
        self.path == *path || (self.recursive && self.path.is_ancestor_of(path))
    }

    pub fn is_shared(&self) -> bool {
        self.lock_type == LockType::Shared
    }
}

/// Strip the `urn:uuid:` scheme off a submitted token.
pub fn token_id(token: &str) -> &str {
    let t = token.trim();
    match t.get(..9) {
        Some(s) if s.eq_ignore_ascii_case("urn:uuid:") => &t[9..],
        _ => t,
    }
}

/// Filter `locks` down to the ones that make `path` locked.
///
/// Walks the path root first; at each prefix, keeps the active locks that
/// sit exactly on that prefix and either are recursive or the prefix is
/// `path` itself.
pub(crate) fn locks_for_path<'a, I>(locks: I, path: &DavPath, now: SystemTime) -> Vec<DavLock>
where
    I: IntoIterator<Item = &'a DavLock> + Clone,
{
    let mut res = Vec::new();
    for prefix in path.ancestors() {
        let exact = prefix == *path;
        res.extend(
            locks
                .clone()
                .into_iter()
                .filter(|l| l.path == prefix && (exact || l.recursive) && l.is_active_at(now))
                .cloned(),
        );
    }
    res
}

/// Do the existing `held` locks allow a new lock of type `wanted`.
pub(crate) fn compatible(held: &[DavLock], wanted: LockType) -> bool {
    held.is_empty() || (wanted == LockType::Shared && held.iter().all(|l| l.is_shared()))
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Lock a node. Returns `Ok(Err(423))` if a conflicting lock exists.
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        lock_type: LockType,
        owner: Option<&'a Element>,
        principal: Option<&'a str>,
        recursive: bool,
        timeout: Duration,
    ) -> LsFuture<'a, LockResult>;

    /// Refresh the lock `token` that applies to `path`. `412` if there is no such lock.
    fn refresh<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        timeout: Duration,
    ) -> LsFuture<'a, LockResult>;

    /// Remove the lock `token`. `204` on success, `409` if no such lock applies to `path`.
    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> LsFuture<'a, StatusCode>;

    /// All active locks that make `path` locked.
    fn discover<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, Vec<DavLock>>;

    /// Remove all locks at or below `path`.
    fn delete<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, ()>;

    /// Lock types this locksystem can hand out for `path`.
    fn supported_locks(&self, _path: &DavPath) -> Vec<LockType> {
        vec![LockType::Exclusive, LockType::Shared]
    }
}
