//! Request preconditions and the lock-check gate.
//!
//! A [`RequestCtx`] lives for exactly one request. It memoizes lock
//! lookups and resource snapshots (ETag, Last-Modified) per path, so all
//! decisions within one request see one consistent view, and the ancestor
//! chain of a path is queried at most once even when a recursive
//! operation visits it over and over.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use headers::HeaderMapExt;
use http::{Request, StatusCode};
use parking_lot::Mutex;

use crate::davheaders::{self, ETagList, If, IfCondition};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::DavFileSystem;
use crate::ls::{DavLock, DavLockSystem};
use crate::props::PropertyManager;
use crate::util::DavMethod;
use crate::DavResult;

/// What we know about a resource at the time of the request.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub exists: bool,
    pub is_dir: bool,
    pub etag: Option<String>,
    pub modified: Option<SystemTime>,
}

pub(crate) struct RequestCtx<'a> {
    fs: &'a dyn DavFileSystem,
    ls: Option<&'a dyn DavLockSystem>,
    props: &'a PropertyManager,
    prefix: &'a str,
    method: DavMethod,
    path: DavPath,
    if_hdr: Option<If>,
    locks: Mutex<HashMap<DavPath, Vec<DavLock>>>,
    snapshots: Mutex<HashMap<DavPath, Arc<Snapshot>>>,
}

// does the entity tag list match the resource. `*` matches any existing
// resource, etag or not. `strong` rejects weak tags.
fn etaglist_match(list: &ETagList, snap: &Snapshot, strong: bool) -> bool {
    match (list, snap.etag.as_deref()) {
        (ETagList::Star, _) => snap.exists,
        (ETagList::Tags(_), None) => false,
        (ETagList::Tags(tags), Some(e)) => tags.iter().any(|t| t.value == e && !(strong && t.weak)),
    }
}

impl<'a> RequestCtx<'a> {
    pub fn new(
        fs: &'a dyn DavFileSystem,
        ls: Option<&'a dyn DavLockSystem>,
        props: &'a PropertyManager,
        prefix: &'a str,
        req: &Request<()>,
        method: DavMethod,
        path: &DavPath,
    ) -> DavResult<RequestCtx<'a>> {
        let if_hdr = req
            .headers()
            .typed_try_get::<If>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
        Ok(RequestCtx {
            fs,
            ls,
            props,
            prefix,
            method,
            path: path.clone(),
            if_hdr,
            locks: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        })
    }

    pub fn if_header(&self) -> Option<&If> {
        self.if_hdr.as_ref()
    }

    /// Resource snapshot, cached for the lifetime of the request.
    pub async fn snapshot(&self, path: &DavPath) -> Arc<Snapshot> {
        let cached = self.snapshots.lock().get(path).cloned();
        if let Some(s) = cached {
            return s;
        }
        let snap = match self.fs.metadata(path).await {
            Ok(meta) => Snapshot {
                exists: true,
                is_dir: meta.is_dir(),
                etag: self.props.etag(&*meta, path),
                modified: self.props.last_modified(&*meta, path),
            },
            Err(_) => Snapshot::default(),
        };
        let snap = Arc::new(snap);
        self.snapshots.lock().insert(path.clone(), snap.clone());
        snap
    }

    /// Active locks that make `path` locked, memoized per path.
    pub async fn locks(&self, path: &DavPath) -> DavResult<Vec<DavLock>> {
        let ls = match self.ls {
            Some(ls) => ls,
            None => return Ok(Vec::new()),
        };
        let cached = self.locks.lock().get(path).cloned();
        if let Some(l) = cached {
            return Ok(l);
        }
        let found = ls.discover(path).await?;
        self.locks.lock().insert(path.clone(), found.clone());
        Ok(found)
    }

    /// Forget cached state for `path` after it was changed.
    pub fn invalidate(&self, path: &DavPath) {
        self.snapshots.lock().remove(path);
        self.locks.lock().remove(path);
    }

    /// Map an If: resource tag onto a path under our prefix.
    fn resolve(&self, uri: Option<&str>) -> Option<DavPath> {
        let uri = match uri {
            None => return Some(self.path.clone()),
            Some(u) => u,
        };
        if uri.starts_with('/') {
            return DavPath::from_str_and_prefix(uri, self.prefix).ok();
        }
        let url = url::Url::parse(uri).ok()?;
        DavPath::from_str_and_prefix(url.path(), self.prefix).ok()
    }

    async fn condition_holds(&self, cond: &IfCondition, path: &DavPath) -> DavResult<bool> {
        if !cond.tokens.is_empty() {
            let locks = self.locks(path).await?;
            for t in &cond.tokens {
                let held = locks.iter().any(|l| l.token == t.value);
                if held == t.negate {
                    return Ok(false);
                }
            }
        }
        if !cond.tags.is_empty() {
            let snap = self.snapshot(path).await;
            for t in &cond.tags {
                let matches = snap.etag.as_deref() == Some(t.value.as_str());
                if matches == t.negate {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Evaluate the If: header. Conditions are grouped per resource; each
    /// group needs one condition that holds, and every group must hold.
    pub async fn if_header_holds(&self) -> DavResult<bool> {
        let if_hdr = match &self.if_hdr {
            Some(h) => h,
            None => return Ok(true),
        };
        let mut groups: Vec<(Option<DavPath>, Vec<&IfCondition>)> = Vec::new();
        for cond in &if_hdr.0 {
            let target = self.resolve(cond.uri.as_deref());
            match groups.iter_mut().find(|(p, _)| target.is_some() && *p == target) {
                Some((_, conds)) => conds.push(cond),
                None => groups.push((target, vec![cond])),
            }
        }
        for (target, conds) in &groups {
            let path = match target {
                Some(p) => p,
                None => {
                    debug!("If: resource tag outside of this handler");
                    return Ok(false);
                }
            };
            let mut any = false;
            for cond in conds {
                if self.condition_holds(cond, path).await? {
                    any = true;
                    break;
                }
            }
            if !any {
                debug!("If: no condition holds for {path:?}");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run all preconditions in order. The first failing one decides the
    /// status: `412 Precondition Failed` or `304 Not Modified`.
    pub async fn check_preconditions(&self, req: &Request<()>) -> DavResult<()> {
        if !self.if_header_holds().await? {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        let hdrs = req.headers();
        let snap = self.snapshot(&self.path).await;

        let if_match = hdrs
            .typed_try_get::<davheaders::IfMatch>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
        if let Some(im) = if_match {
            if !etaglist_match(&im.0, &snap, true) {
                debug!("If-Match failed for {:?}", self.path);
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
        }

        let if_none_match = hdrs
            .typed_try_get::<davheaders::IfNoneMatch>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
        if let Some(inm) = if_none_match {
            if etaglist_match(&inm.0, &snap, false) {
                debug!("If-None-Match matched for {:?}", self.path);
                return Err(if self.method.is_safe() {
                    StatusCode::NOT_MODIFIED.into()
                } else {
                    StatusCode::PRECONDITION_FAILED.into()
                });
            }
        }

        if let (Some(ius), Some(modified)) =
            (hdrs.typed_get::<headers::IfUnmodifiedSince>(), snap.modified)
        {
            if !ius.precondition_passes(modified) {
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
        }

        if self.method.intersects(DavMethod::GET | DavMethod::HEAD) {
            if let (Some(ims), Some(modified)) =
                (hdrs.typed_get::<headers::IfModifiedSince>(), snap.modified)
            {
                if !ims.is_modified(modified) {
                    return Err(StatusCode::NOT_MODIFIED.into());
                }
            }
        }
        Ok(())
    }

    /// Lock-check gate. If `path` is locked, the If: header must carry a
    /// token of one of those locks, in a list that is untagged or tagged
    /// with this path or the path the lock sits on.
    pub async fn check_locks(&self, path: &DavPath) -> DavResult<()> {
        let locks = self.locks(path).await?;
        if locks.is_empty() {
            return Ok(());
        }
        if let Some(if_hdr) = &self.if_hdr {
            for cond in &if_hdr.0 {
                let scope = match &cond.uri {
                    None => None,
                    Some(u) => match self.resolve(Some(u)) {
                        Some(p) => Some(p),
                        None => continue,
                    },
                };
                for t in cond.tokens.iter().filter(|t| !t.negate) {
                    let ok = locks.iter().any(|l| {
                        l.token == t.value
                            && scope.as_ref().map_or(true, |s| s == path || *s == l.path)
                    });
                    if ok {
                        return Ok(());
                    }
                }
            }
        }
        debug!("{path:?} is locked, no valid token submitted");
        Err(DavError::Locked(path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davheaders::EntityTag;
    use crate::fs::memfs::MemFs;
    use crate::fs::OpenOptions;
    use crate::ls::memls::MemLs;
    use crate::ls::LockType;
    use crate::props::PropertyTable;
    use std::time::Duration;

    struct Env {
        fs: Arc<MemFs>,
        ls: Arc<MemLs>,
        props: PropertyManager,
    }

    async fn env() -> Env {
        let fs = MemFs::new();
        fs.create_dir(&DavPath::new("/c").unwrap()).await.unwrap();
        fs.open(&DavPath::new("/c/f").unwrap(), OpenOptions::write())
            .await
            .unwrap();
        Env {
            fs,
            ls: MemLs::new(),
            props: PropertyManager::new(Arc::new(PropertyTable::default())),
        }
    }

    fn request(method: &str, path: &str, hdrs: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().method(method).uri(path);
        for (k, v) in hdrs {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    fn ctx<'a>(env: &'a Env, req: &Request<()>) -> RequestCtx<'a> {
        let method = crate::util::dav_method(req.method()).unwrap();
        let path = DavPath::new(req.uri().path()).unwrap();
        RequestCtx::new(&*env.fs, Some(&*env.ls), &env.props, "", req, method, &path).unwrap()
    }

    async fn etag_of(env: &Env, path: &str) -> String {
        let p = DavPath::new(path).unwrap();
        let meta = env.fs.metadata(&p).await.unwrap();
        env.props.etag(&*meta, &p).unwrap()
    }

    #[tokio::test]
    async fn if_none_match_depends_on_method() {
        let env = env().await;
        let tag = format!("\"{}\"", etag_of(&env, "/c/f").await);

        let req = request("GET", "/c/f", &[("if-none-match", &tag)]);
        let err = ctx(&env, &req).check_preconditions(&req).await.unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::NOT_MODIFIED);

        let req = request("PUT", "/c/f", &[("if-none-match", &tag)]);
        let err = ctx(&env, &req).check_preconditions(&req).await.unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::PRECONDITION_FAILED);

        let req = request("PUT", "/c/new", &[("if-none-match", "*")]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_ok());
    }

    #[tokio::test]
    async fn if_match() {
        let env = env().await;
        let req = request("PUT", "/c/f", &[("if-match", "\"nope\"")]);
        let err = ctx(&env, &req).check_preconditions(&req).await.unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::PRECONDITION_FAILED);

        let req = request("PUT", "/c/missing", &[("if-match", "*")]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_err());

        let req = request("PUT", "/c/f", &[("if-match", "*")]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_ok());
    }

    #[tokio::test]
    async fn modified_since() {
        let env = env().await;
        let future = crate::util::systemtime_to_httpdate(SystemTime::now() + Duration::from_secs(3600));
        let past = crate::util::systemtime_to_httpdate(SystemTime::now() - Duration::from_secs(3600));

        let req = request("GET", "/c/f", &[("if-modified-since", &future)]);
        let err = ctx(&env, &req).check_preconditions(&req).await.unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::NOT_MODIFIED);

        // only for GET/HEAD.
        let req = request("PUT", "/c/f", &[("if-modified-since", &future)]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_ok());

        let req = request("PUT", "/c/f", &[("if-unmodified-since", &past)]);
        let err = ctx(&env, &req).check_preconditions(&req).await.unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn if_header_logic() {
        let env = env().await;
        let lock = env
            .ls
            .lock(&DavPath::new("/c").unwrap(), LockType::Exclusive, None, None, true, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let etag = etag_of(&env, "/c/f").await;

        // OR across lists for the same resource.
        let h = format!("(<urn:uuid:wrong>) (<{}>)", lock.urn());
        let req = request("PUT", "/c/f", &[("if", &h)]);
        assert!(ctx(&env, &req).if_header_holds().await.unwrap());

        // AND inside one list.
        let h = format!("(<{}> [\"wrong\"])", lock.urn());
        let req = request("PUT", "/c/f", &[("if", &h)]);
        assert!(!ctx(&env, &req).if_header_holds().await.unwrap());

        let h = format!("(<{}> [\"{etag}\"])", lock.urn());
        let req = request("PUT", "/c/f", &[("if", &h)]);
        assert!(ctx(&env, &req).if_header_holds().await.unwrap());

        // negation.
        let req = request("PUT", "/c/f", &[("if", "(Not <DAV:no-lock>)")]);
        assert!(ctx(&env, &req).if_header_holds().await.unwrap());
        let req = request("PUT", "/c/f", &[("if", "(Not [\"x\"] <DAV:no-lock>)")]);
        assert!(!ctx(&env, &req).if_header_holds().await.unwrap());

        // every tagged resource must hold.
        let h = format!("</c> (<{}>) </c/f> ([\"nope\"])", lock.urn());
        let req = request("PUT", "/c/f", &[("if", &h)]);
        assert!(!ctx(&env, &req).if_header_holds().await.unwrap());

        let err = {
            let req = request("PUT", "/c/f", &[("if", &h)]);
            ctx(&env, &req).check_preconditions(&req).await.unwrap_err()
        };
        assert_eq!(err.statuscode(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn lock_gate() {
        let env = env().await;
        let c = DavPath::new("/c").unwrap();
        let f = DavPath::new("/c/f").unwrap();
        let lock = env
            .ls
            .lock(&c, LockType::Exclusive, None, None, true, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        let req = request("DELETE", "/c/f", &[]);
        match ctx(&env, &req).check_locks(&f).await {
            Err(DavError::Locked(p)) => assert_eq!(p, f),
            other => panic!("expected Locked, got {other:?}"),
        }

        let h = format!("(<{}>)", lock.urn());
        let req = request("DELETE", "/c/f", &[("if", &h)]);
        assert!(ctx(&env, &req).check_locks(&f).await.is_ok());

        // tagged with the lock root also counts.
        let h = format!("<http://example.com/c/> (<{}>)", lock.urn());
        let req = request("DELETE", "/c/f", &[("if", &h)]);
        assert!(ctx(&env, &req).check_locks(&f).await.is_ok());

        // negated tokens never unlock anything.
        let h = format!("(Not <{}>)", lock.urn());
        let req = request("DELETE", "/c/f", &[("if", &h)]);
        assert!(ctx(&env, &req).check_locks(&f).await.is_err());
    }

    #[test]
    fn weak_tags_fail_if_match() {
        let list = ETagList::Tags(vec![EntityTag {
            value: "a".into(),
            weak: true,
            negate: false,
        }]);
        let snap = Snapshot {
            exists: true,
            etag: Some("a".into()),
            ..Snapshot::default()
        };
        assert!(!etaglist_match(&list, &snap, true));
        assert!(etaglist_match(&list, &snap, false));
        assert!(!etaglist_match(&ETagList::Star, &Snapshot::default(), false));
    }

    #[tokio::test]
    async fn star_means_exists_without_etags() {
        let mut env = env().await;
        env.props = PropertyManager::new(Arc::new(PropertyTable::new(vec![], vec![])));
        let req = request("GET", "/c/f", &[]);
        let snap = ctx(&env, &req).snapshot(&DavPath::new("/c/f").unwrap()).await;
        assert!(snap.exists && snap.etag.is_none());

        let req = request("PUT", "/c/f", &[("if-match", "*")]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_ok());

        let req = request("PUT", "/c/f", &[("if-none-match", "*")]);
        let err = ctx(&env, &req).check_preconditions(&req).await.unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::PRECONDITION_FAILED);

        let req = request("PUT", "/c/new", &[("if-none-match", "*")]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_ok());
        let req = request("PUT", "/c/new", &[("if-match", "*")]);
        assert!(ctx(&env, &req).check_preconditions(&req).await.is_err());
    }
}
