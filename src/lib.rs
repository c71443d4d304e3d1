//! ## WebDAV protocol engine
//!
//! [`Webdav`] (RFC4918) is HTTP (GET/HEAD/PUT/DELETE) plus a set of extension
//! methods (PROPFIND, LOCK, COPY, etc). This library is a `handler`: it takes
//! a `http::Request`, runs it against a storage backend, and produces a
//! `http::Response`.
//!
//! Where most of the work goes:
//!
//! - hierarchical locking. Exclusive and shared locks over a path hierarchy,
//!   with recursive locks that cover every descendant ([`DavLockSystem`]).
//! - the `If:` header. Lock tokens and entity tags combined with AND, OR and
//!   NOT, evaluated per resource ([`davheaders::If`]).
//! - preconditions. `If`, `If-Match`, `If-None-Match`, `If-Unmodified-Since`
//!   and `If-Modified-Since`, in that order, before anything is changed.
//! - recursive COPY, MOVE and DELETE. Depth-first walks that check locks
//!   per node and never stop at the first error; failures are reported in
//!   one `207 Multi-Status` body.
//!
//! ## Backend interfaces.
//!
//! - you supply a [filesystem][DavFileSystem] for backend storage, which can
//!   optionally implement reading/writing [DAV properties][DavProp].
//! - you supply a [locksystem][DavLockSystem]. Included are [`MemLs`], and,
//!   behind the `sqlls` feature, `SqlLs` which keeps locks in an SQLite database.
//!
//! The handler works with the standard http types from the `http` and
//! `http_body` crates, so it can be used straight away with hyper. A
//! [warp][warp-compat] adapter is also provided.
//!
//! ## Example.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use dav_engine::{DavHandler, FileSystem, LockSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dir = "/tmp";
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(FileSystem::local(dir, false))
//!         .locksystem(LockSystem::Mem)
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving {} on {}", dir, addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [warp-compat]: crate::warp

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

macro_rules! notimplemented_fut {
    ($method:expr) => {{
        trace!("FS: {} not implemented", $method);
        Box::pin(futures_util::future::ready(Err(
            $crate::fs::FsError::NotImplemented,
        )))
    }};
}

mod conditional;
mod davhandler;
mod errors;
mod multierror;
mod xmltree_ext;
mod util;

pub mod body;
pub mod davheaders;
pub mod davpath;
pub mod fs;
pub mod ls;
pub mod nonce;
pub mod props;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

pub use crate::errors::{DavError, DavResult};

pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem, LockSystem};
pub use crate::fs::{DavDirEntry, DavFile, DavFileSystem, DavMetaData, DavProp, FsError};
pub use crate::ls::{DavLock, DavLockSystem, LockType};
pub use crate::nonce::NonceCache;
pub use crate::props::{PropertyManager, PropertyTable};
pub use crate::util::DavMethod;

#[cfg(any(docsrs, feature = "memfs"))]
pub use crate::fs::memfs::MemFs;
#[cfg(any(docsrs, feature = "localfs"))]
pub use crate::fs::localfs::LocalFs;
pub use crate::ls::memls::MemLs;
#[cfg(any(docsrs, feature = "sqlls"))]
pub use crate::ls::sqlls::SqlLs;
