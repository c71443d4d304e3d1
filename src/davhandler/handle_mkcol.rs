use http::{Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::fs::*;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, path: &DavPath) -> DavResult<Response<Body>> {
        // a request body was already refused with 415 by the dispatcher.
        match self.fs.metadata(path).await {
            Ok(_) => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if !self.has_parent(path).await {
            return Err(StatusCode::CONFLICT.into());
        }
        match self.fs.create_dir(path).await {
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::CREATED;
                Ok(res)
            }
            // lost a race with another creator.
            Err(FsError::Exists) => Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            Err(e) => Err(e.into()),
        }
    }
}
