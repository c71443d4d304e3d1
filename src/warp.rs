//! Serve webdav from a `warp` filter.
//!
//! The filters never reject. A missing resource is a 404 reply from the
//! handler, not a warp rejection.
use std::convert::Infallible;
#[cfg(any(docsrs, feature = "localfs"))]
use std::path::Path;

use http::header::HeaderMap;
use http::{Method, Request, Response, StatusCode};
use warp::filters::BoxedFilter;
use warp::path::{FullPath, Tail};
use warp::{Filter, Reply};

use crate::DavHandler;
#[cfg(any(docsrs, feature = "localfs"))]
use crate::{FileSystem, LockSystem};

fn status_reply(status: StatusCode) -> Response<hyper::Body> {
    let mut resp = Response::new(hyper::Body::empty());
    *resp.status_mut() = status;
    resp
}

/// Reply-filter that runs `handler`.
///
/// The part of the request path that was matched before this filter is
/// appended to the handler's own prefix.
pub fn dav_handler(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    warp::method()
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and_then(move |method: Method, full: FullPath, tail: Tail, headers: HeaderMap, body| {
            let handler = handler.clone();
            async move {
                let full = full.as_str();
                let mounted = full.strip_suffix(tail.as_str()).unwrap_or_default().to_string();

                let mut req = match Request::builder().method(method).uri(full).body(body) {
                    Ok(req) => req,
                    Err(_) => return Ok::<_, Infallible>(status_reply(StatusCode::BAD_REQUEST)),
                };
                *req.headers_mut() = headers;

                let (parts, body) = handler
                    .handle_stream_with(req, Some(mounted), None)
                    .await
                    .into_parts();
                Ok(Response::from_parts(parts, hyper::Body::wrap_stream(body)))
            }
        })
        .boxed()
}

/// Serve the directory `base` below the current path, with in-memory
/// locking. With `autoindex` set a GET on a directory returns an HTML
/// index.
#[cfg(any(docsrs, feature = "localfs"))]
pub fn dav_dir(base: impl AsRef<Path>, autoindex: bool) -> BoxedFilter<(impl Reply,)> {
    let handler = DavHandler::builder(FileSystem::local(base.as_ref(), false))
        .locksystem(LockSystem::Mem)
        .autoindex(autoindex)
        .build();
    dav_handler(handler)
}
