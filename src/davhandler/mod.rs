//! The main entry point of the library, [`DavHandler`], and its
//! configuration.
//!
//! Every request runs through the same pipeline: method check, path
//! mapping, body read, conditional headers, the lock-check gate, and then
//! one of the method handlers in the submodules.
use std::error::Error as StdError;
use std::io;
use std::panic::AssertUnwindSafe;
#[cfg(any(docsrs, feature = "localfs"))]
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Buf;
use futures_util::stream::{Stream, StreamExt};
use futures_util::FutureExt;
use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::conditional::RequestCtx;
use crate::davpath::DavPath;
use crate::ls::memls::MemLs;
use crate::multierror::lock_token_submitted_body;
use crate::props::{PropertyManager, PropertyTable};
use crate::util::{dav_method, DavMethod};

use crate::errors::DavError;
use crate::fs::*;
use crate::ls::*;
use crate::DavResult;

pub(crate) mod handle_copymove;
pub(crate) mod handle_delete;
pub(crate) mod handle_gethead;
pub(crate) mod handle_lock;
pub(crate) mod handle_mkcol;
pub(crate) mod handle_options;
pub(crate) mod handle_props;
pub(crate) mod handle_put;

const READ_BUF_SIZE: usize = 16384;
// request bodies other than PUT are read into memory.
const MAX_XML_BODY: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    // stripped off the request path before mapping it to the store.
    prefix: String,
    fs: FileSystem,
    ls: Option<LockSystem>,
    allow: DavMethod,
    // webdav speak for "user". Becomes the principal of new locks.
    principal: Option<String>,
    autoindex: bool,
    read_buf_size: usize,
    props: Arc<PropertyTable>,
}

/// Resource store backend.
#[derive(Clone)]
pub enum FileSystem {
    /// Everything in memory, gone when the handler is dropped.
    #[cfg(any(docsrs, feature = "memfs"))]
    Mem,
    /// A directory on the local disk.
    #[cfg(any(docsrs, feature = "localfs"))]
    Local {
        base: PathBuf,
        /// Create files world-readable.
        public: bool,
    },
    /// Bring your own.
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    /// Serve the directory `path`.
    #[cfg(any(docsrs, feature = "localfs"))]
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        FileSystem::Local {
            base: path.into(),
            public,
        }
    }

    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            #[cfg(any(docsrs, feature = "memfs"))]
            FileSystem::Mem => crate::fs::memfs::MemFs::new(),
            #[cfg(any(docsrs, feature = "localfs"))]
            FileSystem::Local { base, public } => crate::fs::localfs::LocalFs::new(base, public),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Lock manager backend.
///
/// For the SQLite backend, create the store with `SqlLs::with_reaper` and
/// pass it as `Custom`. `SqlLs::new` alone never removes expired rows.
#[derive(Default, Clone)]
pub enum LockSystem {
    #[default]
    Mem,
    Custom(Arc<dyn DavLockSystem>),
}

impl LockSystem {
    fn build(self) -> Arc<dyn DavLockSystem> {
        match self {
            LockSystem::Mem => MemLs::new(),
            LockSystem::Custom(ls) => ls,
        }
    }
}

impl DavBuilder {
    /// A configuration serving `fs`, with all methods allowed and no locking.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            ls: None,
            allow: DavMethod::WEBDAV_RW,
            principal: None,
            autoindex: false,
            read_buf_size: READ_BUF_SIZE,
            props: Arc::new(PropertyTable::default()),
        }
    }

    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a store path.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Enable LOCK and UNLOCK.
    pub fn locksystem(mut self, ls: LockSystem) -> Self {
        self.ls = Some(ls);
        self
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(mut self, allow: DavMethod) -> Self {
        self.allow = allow;
        self
    }

    /// Recorded as the principal of every lock that is created.
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Does a GET on a collection produce an HTML index.
    pub fn autoindex(mut self, autoindex: bool) -> Self {
        self.autoindex = autoindex;
        self
    }

    /// Chunk size when streaming GET responses.
    pub fn read_buf_size(mut self, size: usize) -> Self {
        self.read_buf_size = size.max(1);
        self
    }

    /// Replace the table of live properties.
    pub fn properties(mut self, table: PropertyTable) -> Self {
        self.props = Arc::new(table);
        self
    }
}

/// The webdav handler.
///
/// Cheap to clone; clones share the store and the lock manager.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Option<Arc<dyn DavLockSystem>>,
    pub(crate) allow: DavMethod,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) autoindex: bool,
    pub(crate) read_buf_size: usize,
    pub(crate) props: PropertyManager,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(),
            ls: cfg.ls.map(|ls| ls.build()),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            autoindex: cfg.autoindex,
            read_buf_size: cfg.read_buf_size,
            props: PropertyManager::new(cfg.props),
        }
    }
}

impl DavHandler {
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// `prefix` is appended to the configured prefix, `principal`
    /// replaces the configured one for this request only.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.with_overrides(prefix, principal).handle_inner(req).await
    }

    /// Like [`handle`](Self::handle), for servers whose request body is a
    /// `Stream` of buffers instead of an `http_body::Body`.
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let (parts, body) = req.into_parts();
        self.handle_inner(Request::from_parts(parts, StreamBody::new(body)))
            .await
    }

    /// [`handle_with`](Self::handle_with) for `Stream` request bodies.
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let (parts, body) = req.into_parts();
        self.with_overrides(prefix, principal)
            .handle_inner(Request::from_parts(parts, StreamBody::new(body)))
            .await
    }

    fn with_overrides(&self, prefix: Option<String>, principal: Option<String>) -> DavHandler {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                self.prefix.trim_end_matches('/'),
                prefix.trim_start_matches('/')
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this
    }
}

impl DavHandler {
    // the parent exists and is a collection.
    pub(crate) async fn has_parent(&self, path: &DavPath) -> bool {
        let p = match path.parent() {
            Some(p) => p,
            None => return false,
        };
        self.fs
            .metadata(&p)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    // list the children of a collection with their metadata.
    pub(crate) async fn read_children(&self, path: &DavPath) -> FsResult<Vec<(DavPath, Box<dyn DavMetaData>)>> {
        let mut entries = self.fs.read_dir(path).await?;
        let mut res = Vec::new();
        while let Some(entry) = entries.next().await {
            let name = match String::from_utf8(entry.name()) {
                Ok(n) => n,
                Err(_) => {
                    warn!("skipping non-utf8 name in {path:?}");
                    continue;
                }
            };
            let meta = entry.metadata().await?;
            let mut child = path.combine(&name);
            if meta.is_dir() {
                child = child.as_collection();
            }
            res.push((child, meta));
        }
        Ok(res)
    }

    // drain the request body, refusing more than `max_size` bytes.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(chunk) = body.data().await {
            let mut buf = chunk.map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()))?;
            if data.len() + buf.remaining() > max_size {
                return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
            }
            while buf.has_remaining() {
                let n = buf.chunk().len();
                data.extend_from_slice(buf.chunk());
                buf.advance(n);
            }
        }
        Ok(data)
    }

    // turn a failed request into a response.
    fn error_response(err: DavError) -> Response<Body> {
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = err.statuscode();
        let h = resp.headers_mut();
        if err.must_close() {
            h.insert("connection", HeaderValue::from_static("close"));
        }
        match &err {
            DavError::Locked(path) => {
                h.insert(
                    "content-type",
                    HeaderValue::from_static("application/xml; charset=utf-8"),
                );
                *resp.body_mut() = lock_token_submitted_body(path);
            }
            _ => h.typed_insert(headers::ContentLength(0)),
        }
        resp
    }

    async fn handle_inner<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let res = match AssertUnwindSafe(self.handle2(req)).catch_unwind().await {
            Ok(res) => res,
            Err(_) => {
                error!("request handler panicked");
                Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
            }
        };
        match res {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                Self::error_response(err)
            }
        }
    }

    // the request pipeline.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        let method = dav_method(req.method()).map_err(|e| {
            debug!("unknown method {} on {}", req.method(), req.uri());
            e
        })?;
        if !self.allow.contains(method) {
            debug!("method {} not allowed on {}", req.method(), req.uri());
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // PUT streams its body into the store; the others get it pre-read.
        let (body_strm, body_data) = if method == DavMethod::PUT {
            (Some(body), Vec::new())
        } else {
            (None, self.read_request(body, MAX_XML_BODY).await?)
        };

        // Not all methods accept a body.
        if !DavMethod::WEBDAV_BODY.contains(method) && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        let ctx = RequestCtx::new(
            &*self.fs,
            self.ls.as_deref(),
            &self.props,
            &self.prefix,
            &req,
            method,
            &path,
        )?;
        ctx.check_preconditions(&req).await?;

        // New LOCKs are checked by the locksystem itself, COPY only
        // writes to the destination, which the copy engine checks.
        let is_lock_refresh = method == DavMethod::LOCK && body_data.is_empty();
        let gated = !DavMethod::NO_LOCK_CHECK.contains(method)
            && method != DavMethod::COPY
            && (method != DavMethod::LOCK || is_lock_refresh);
        if gated {
            ctx.check_locks(&path).await?;
        }

        if method == DavMethod::OPTIONS {
            self.handle_options(&req, &path).await
        } else if method == DavMethod::PROPFIND {
            self.handle_propfind(&req, &ctx, &path, &body_data).await
        } else if method == DavMethod::PROPPATCH {
            self.handle_proppatch(&path, &body_data).await
        } else if method == DavMethod::MKCOL {
            self.handle_mkcol(&path).await
        } else if method == DavMethod::DELETE {
            self.handle_delete(&req, &ctx, &path).await
        } else if method == DavMethod::LOCK {
            self.handle_lock(&req, &ctx, &path, &body_data).await
        } else if method == DavMethod::UNLOCK {
            self.handle_unlock(&req, &path).await
        } else if method == DavMethod::HEAD || method == DavMethod::GET {
            self.handle_get(&req, &path, method).await
        } else if method == DavMethod::COPY || method == DavMethod::MOVE {
            self.handle_copymove(&req, &ctx, &path, method).await
        } else if let Some(body) = body_strm {
            self.handle_put(&req, &path, body).await
        } else {
            Err(DavError::UnknownDavMethod)
        }
    }
}
