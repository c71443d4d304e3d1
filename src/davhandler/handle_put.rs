use std::error::Error as StdError;
use std::io;

use bytes::Buf;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // partial PUT is not supported.
        if req.headers().contains_key("content-range") {
            return Err(StatusCode::NOT_IMPLEMENTED.into());
        }

        let exists = match self.fs.metadata(path).await {
            Ok(meta) if meta.is_dir() => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            Ok(_) => true,
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        if !exists && !self.has_parent(path).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let mut file = self.fs.open(path, OpenOptions::write()).await?;

        pin_utils::pin_mut!(body);
        while let Some(data) = body.data().await {
            let buf = data.map_err(|e| {
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()))
            })?;
            if buf.has_remaining() {
                file.write_buf(Box::new(buf)).await?;
            }
        }
        file.flush().await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        if let Ok(meta) = file.metadata().await {
            if let Some(etag) = self.props.etag(&*meta, path) {
                if let Ok(v) = HeaderValue::from_str(&format!("\"{etag}\"")) {
                    res.headers_mut().insert("etag", v);
                }
            }
        }
        Ok(res)
    }
}
