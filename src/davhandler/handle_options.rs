use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::util::{dav_method, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    // methods that make sense for the resource at `path`, given its state.
    async fn methods_for(&self, path: &DavPath) -> DavMethod {
        let meta = match self.fs.metadata(path).await {
            Ok(meta) => meta,
            Err(_) => {
                return DavMethod::OPTIONS | DavMethod::MKCOL | DavMethod::PUT | DavMethod::LOCK;
            }
        };
        let mut m = DavMethod::OPTIONS
            | DavMethod::PROPFIND
            | DavMethod::PROPPATCH
            | DavMethod::COPY
            | DavMethod::MOVE
            | DavMethod::DELETE
            | DavMethod::LOCKING;
        if meta.is_file() {
            m |= DavMethod::HEAD | DavMethod::GET | DavMethod::PUT;
        } else if self.autoindex {
            m |= DavMethod::HEAD | DavMethod::GET;
        }
        if path.is_root() {
            m.remove(DavMethod::MOVE | DavMethod::DELETE);
        }
        m
    }

    pub(crate) async fn handle_options(&self, req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        // level 2 is advertised even without a locksystem.
        h.insert("DAV", HeaderValue::from_static("1,2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        let mut allow = self.methods_for(path).await & self.allow;
        if self.ls.is_none() {
            allow.remove(DavMethod::LOCKING);
        }
        // when answering for a refused method, leave that method out.
        let method = dav_method(req.method()).unwrap_or(DavMethod::OPTIONS);
        if method != DavMethod::OPTIONS {
            allow.remove(method);
        }
        allow.insert(DavMethod::OPTIONS);

        if let Ok(a) = HeaderValue::from_str(&allow.names()) {
            res.headers_mut().insert("allow", a);
        }
        Ok(res)
    }
}
