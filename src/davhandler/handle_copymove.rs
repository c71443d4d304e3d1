//! COPY and MOVE.
//!
//! Both walk the source pre-order. Every destination node passes the
//! lock-check gate before anything is written to it; an existing node at
//! the destination is first deleted (which checks its own locks). MOVE
//! also checks the source node, and removes it only after its copy,
//! including all descendants, fully succeeded.
use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::RequestCtx;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::multierror::MultiError;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // copy the dead properties of one node.
    async fn copy_props(&self, source: &DavPath, dest: &DavPath) {
        if !self.fs.have_props(source).await {
            return;
        }
        let props = match self.fs.get_props(source, true).await {
            Ok(p) if !p.is_empty() => p,
            Ok(_) => return,
            Err(e) => {
                debug!("get_props {source:?}: {e:?}");
                return;
            }
        };
        let patch = props.into_iter().map(|p| (true, p)).collect();
        if let Err(e) = self.fs.patch_props(dest, patch).await {
            debug!("patch_props {dest:?}: {e:?}");
        }
    }

    // clear the destination node and put a copy of the source node there.
    // does not descend.
    async fn copy_node(
        &self,
        ctx: &RequestCtx<'_>,
        res: &mut MultiError,
        source: &DavPath,
        source_is_dir: bool,
        dest: &DavPath,
    ) -> bool {
        if let Err(e) = ctx.check_locks(dest).await {
            res.add_error(dest, &e);
            return false;
        }
        match self.fs.metadata(dest).await {
            Ok(meta) => {
                if !self.delete_items(ctx, res, dest.clone(), meta.is_dir()).await {
                    return false;
                }
            }
            Err(FsError::NotFound) => {}
            Err(e) => {
                res.add_error(dest, &e.into());
                return false;
            }
        }
        let created = if source_is_dir {
            self.fs.create_dir(dest).await
        } else {
            self.fs.copy(source, dest).await
        };
        if let Err(e) = created {
            res.add_error(dest, &e.into());
            return false;
        }
        ctx.invalidate(dest);
        self.copy_props(source, dest).await;
        true
    }

    pub(crate) fn copy_items<'a>(
        &'a self,
        ctx: &'a RequestCtx<'a>,
        res: &'a mut MultiError,
        source: DavPath,
        source_is_dir: bool,
        dest: DavPath,
        depth: Depth,
    ) -> BoxFuture<'a, bool> {
        async move {
            if !self.copy_node(ctx, res, &source, source_is_dir, &dest).await {
                return false;
            }
            if !source_is_dir || depth == Depth::Zero {
                return true;
            }
            let children = match self.read_children(&source).await {
                Ok(c) => c,
                Err(e) => {
                    res.add_error(&source, &e.into());
                    return false;
                }
            };
            let mut all_ok = true;
            for (child, meta) in children {
                let mut child_dest = dest.combine(child.file_name());
                if meta.is_dir() {
                    child_dest = child_dest.as_collection();
                }
                if !self
                    .copy_items(ctx, res, child, meta.is_dir(), child_dest, depth)
                    .await
                {
                    all_ok = false;
                }
            }
            all_ok
        }
        .boxed()
    }

    pub(crate) fn move_items<'a>(
        &'a self,
        ctx: &'a RequestCtx<'a>,
        res: &'a mut MultiError,
        source: DavPath,
        source_is_dir: bool,
        dest: DavPath,
    ) -> BoxFuture<'a, bool> {
        async move {
            if let Err(e) = ctx.check_locks(&source).await {
                res.add_error(&source, &e);
                return false;
            }
            if !self.copy_node(ctx, res, &source, source_is_dir, &dest).await {
                return false;
            }
            if source_is_dir {
                let children = match self.read_children(&source).await {
                    Ok(c) => c,
                    Err(e) => {
                        res.add_error(&source, &e.into());
                        return false;
                    }
                };
                let mut all_ok = true;
                for (child, meta) in children {
                    let mut child_dest = dest.combine(child.file_name());
                    if meta.is_dir() {
                        child_dest = child_dest.as_collection();
                    }
                    if !self
                        .move_items(ctx, res, child, meta.is_dir(), child_dest)
                        .await
                    {
                        all_ok = false;
                    }
                }
                if !all_ok {
                    return false;
                }
            }
            let removed = if source_is_dir {
                self.fs.remove_dir(&source).await
            } else {
                self.fs.remove_file(&source).await
            };
            if let Err(e) = removed {
                res.add_error(&source, &e.into());
                return false;
            }
            ctx.invalidate(&source);
            self.drop_locks(&source).await;
            true
        }
        .boxed()
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx<'_>,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        // Depth 1 makes no sense for COPY, and MOVE is always infinite.
        let depth = match req.headers().typed_get::<Depth>() {
            None => Depth::Infinity,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
            Some(d) => d,
        };
        if method == DavMethod::MOVE && depth != Depth::Infinity {
            return Err(StatusCode::BAD_REQUEST.into());
        }

        let dest = match req.headers().typed_get::<davheaders::Destination>() {
            Some(d) => d,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let mut dest = DavPath::from_str_and_prefix(&dest.0, &self.prefix)
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;

        // source and destination must not overlap.
        if dest == *path || path.is_ancestor_of(&dest) || dest.is_ancestor_of(path) {
            return Err(StatusCode::FORBIDDEN.into());
        }

        let meta = self.fs.metadata(path).await?;
        let mut path = path.clone();
        if meta.is_dir() {
            path = path.as_collection();
            dest = dest.as_collection();
        }

        if !self.has_parent(&dest).await {
            return Err(StatusCode::CONFLICT.into());
        }
        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .map(|o| o.0)
            .unwrap_or(true);
        let exists = match self.fs.metadata(&dest).await {
            Ok(_) => true,
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        if exists && !overwrite {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        let mut res = MultiError::new();
        if method == DavMethod::COPY {
            self.copy_items(ctx, &mut res, path.clone(), meta.is_dir(), dest.clone(), depth)
                .await;
        } else {
            self.move_items(ctx, &mut res, path.clone(), meta.is_dir(), dest.clone())
                .await;
        }

        let ok_status = if exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        res.into_response(&dest, ok_status)
    }
}
