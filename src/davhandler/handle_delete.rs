//! DELETE, and the recursive delete used by COPY and MOVE to clear an
//! existing destination.
//!
//! The walk is post-order: children go first, a collection is only removed
//! once all of its children are gone. A node that is locked (without the
//! right token in the `If:` header) or that the store refuses to remove is
//! recorded in the [`MultiError`] and its subtree is left alone. Ancestors
//! of a failed node stay as well, but they are not reported: their failure
//! is implied by the failed descendant.
use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::RequestCtx;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::multierror::MultiError;
use crate::DavResult;

impl crate::DavHandler {
    /// Delete `path` and everything below it. Returns true when all of it
    /// is gone.
    pub(crate) fn delete_items<'a>(
        &'a self,
        ctx: &'a RequestCtx<'a>,
        res: &'a mut MultiError,
        path: DavPath,
        is_dir: bool,
    ) -> BoxFuture<'a, bool> {
        async move {
            if let Err(e) = ctx.check_locks(&path).await {
                res.add_error(&path, &e);
                return false;
            }

            if is_dir {
                let children = match self.read_children(&path).await {
                    Ok(c) => c,
                    Err(e) => {
                        res.add_error(&path, &e.into());
                        return false;
                    }
                };
                let mut all_gone = true;
                for (child, meta) in children {
                    if !self.delete_items(ctx, res, child, meta.is_dir()).await {
                        all_gone = false;
                    }
                }
                if !all_gone {
                    return false;
                }
            }

            let removed = if is_dir {
                self.fs.remove_dir(&path).await
            } else {
                self.fs.remove_file(&path).await
            };
            if let Err(e) = removed {
                res.add_error(&path, &e.into());
                return false;
            }
            ctx.invalidate(&path);
            self.drop_locks(&path).await;
            true
        }
        .boxed()
    }

    // locks on a resource that is gone would otherwise linger until they expire.
    pub(crate) async fn drop_locks(&self, path: &DavPath) {
        if let Some(ls) = &self.ls {
            if let Err(e) = ls.delete(path).await {
                warn!("failed to remove locks for {path:?}: {e}");
            }
        }
    }

    pub(crate) async fn handle_delete(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx<'_>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let meta = self.fs.metadata(path).await?;

        // a collection can only be deleted as a whole.
        if meta.is_dir() {
            if let Some(depth) = req.headers().typed_get::<Depth>() {
                if depth != Depth::Infinity {
                    return Err(StatusCode::BAD_REQUEST.into());
                }
            }
        }

        let mut res = MultiError::new();
        let mut path = path.clone();
        if meta.is_dir() {
            path = path.as_collection();
        }
        self.delete_items(ctx, &mut res, path.clone(), meta.is_dir()).await;
        res.into_response(&path, StatusCode::NO_CONTENT)
    }
}
