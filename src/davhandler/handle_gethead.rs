use std::cmp;
use std::fmt::Write as _;
use std::io::{self, SeekFrom};
use std::ops::Bound;

use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::fs::*;
use crate::util::{systemtime_to_rfc3339, DavMethod};
use crate::DavResult;

// What a `Range:` header asks for, against a body of `len` bytes.
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    // first and last byte, inclusive.
    Part(u64, u64),
    Unsatisfiable,
}

// Only single ranges are served; several ranges get the full body.
// `bytes=-N` decodes as (Unbounded, Included(N)) and means the last N bytes.
fn byte_range(range: &headers::Range, len: u64) -> ByteRange {
    let mut specs = range.iter();
    let (start, end) = match (specs.next(), specs.next()) {
        (Some(spec), None) => spec,
        _ => return ByteRange::Full,
    };
    let last = len.saturating_sub(1);
    let (start, end) = match (start, end) {
        (Bound::Included(s), Bound::Included(e)) => (s, e.min(last)),
        (Bound::Included(s), Bound::Unbounded) => (s, last),
        (Bound::Unbounded, Bound::Included(0)) => return ByteRange::Unsatisfiable,
        (Bound::Unbounded, Bound::Included(n)) => (len.saturating_sub(n), last),
        _ => return ByteRange::Full,
    };
    if len == 0 || start >= len || start > end {
        ByteRange::Unsatisfiable
    } else {
        ByteRange::Part(start, end)
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        req: &Request<()>,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let head = method == DavMethod::HEAD;

        let meta = self.fs.metadata(path).await?;
        if meta.is_dir() {
            return self.handle_autoindex(path, head).await;
        }

        let mut file = self.fs.open(path, OpenOptions::read()).await?;
        // the size may have changed since the stat above.
        let meta = file.metadata().await?;
        let len = meta.len();

        let etag = self
            .props
            .etag(&*meta, path)
            .and_then(|t| format!("\"{t}\"").parse::<headers::ETag>().ok());
        let modified = meta.modified().ok().map(headers::LastModified::from);

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.typed_insert(headers::AcceptRanges::bytes());
        if let Some(etag) = &etag {
            h.typed_insert(etag.clone());
        }
        if let Some(modified) = &modified {
            h.typed_insert(modified.clone());
        }
        let (_, ctype) = self.props.get_property(&*meta, path, "getcontenttype");
        if let Some(v) = ctype.and_then(|c| HeaderValue::from_str(&c).ok()) {
            h.insert("content-type", v);
        }

        // a stale If-Range turns the request back into a plain GET.
        let hdrs = req.headers();
        let range = match hdrs.typed_get::<headers::Range>() {
            Some(r) => match hdrs.typed_get::<headers::IfRange>() {
                Some(ir) if ir.is_modified(etag.as_ref(), modified.as_ref()) => ByteRange::Full,
                _ => byte_range(&r, len),
            },
            None => ByteRange::Full,
        };
        let (start, count) = match range {
            ByteRange::Full => (0, len),
            ByteRange::Part(start, end) => {
                debug!("GET {path:?}: bytes {start}-{end}/{len}");
                *res.status_mut() = StatusCode::PARTIAL_CONTENT;
                if let Ok(cr) = headers::ContentRange::bytes(start..=end, len) {
                    res.headers_mut().typed_insert(cr);
                }
                (start, end - start + 1)
            }
            ByteRange::Unsatisfiable => {
                *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                let h = res.headers_mut();
                h.remove("content-type");
                h.typed_insert(headers::ContentRange::unsatisfied_bytes(len));
                h.typed_insert(headers::ContentLength(0));
                return Ok(res);
            }
        };
        res.headers_mut().typed_insert(headers::ContentLength(count));

        if head {
            return Ok(res);
        }
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        let bufsize = self.read_buf_size;
        *res.body_mut() = Body::stream(async_stream::stream! {
            let mut left = count;
            while left > 0 {
                let n = cmp::min(left, bufsize as u64) as usize;
                match file.read_bytes(n).await {
                    Ok(buf) if buf.is_empty() => break,
                    Ok(buf) => {
                        left = left.saturating_sub(buf.len() as u64);
                        yield Ok(buf);
                    }
                    Err(e) => {
                        debug!("read error during GET: {e:?}");
                        yield Err(io::Error::from(e));
                        break;
                    }
                }
            }
        });
        Ok(res)
    }

    // html listing of a collection.
    async fn handle_autoindex(&self, path: &DavPath, head: bool) -> DavResult<Response<Body>> {
        if !self.autoindex {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let mut entries = self.read_children(path).await?;
        entries.sort_by(|a, b| {
            b.1.is_dir()
                .cmp(&a.1.is_dir())
                .then_with(|| a.0.file_name().cmp(b.0.file_name()))
        });

        let title = htmlescape::encode_minimal(&path.as_collection().as_str());
        let mut w = String::new();
        let _ = write!(
            w,
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
             <title>Index of {title}</title></head>\n<body>\n<h1>Index of {title}</h1>\n<table>\n"
        );
        if let Some(parent) = path.parent() {
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">Parent Directory</a></td><td></td><td></td></tr>",
                htmlescape::encode_attribute(&parent.as_collection().with_prefix())
            );
        }
        for (child, meta) in &entries {
            let mut name = htmlescape::encode_minimal(child.file_name());
            let size = if meta.is_dir() {
                name.push('/');
                "-".to_string()
            } else {
                meta.len().to_string()
            };
            let modified = meta.modified().map(systemtime_to_rfc3339).unwrap_or_default();
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">{name}</a></td><td>{modified}</td><td>{size}</td></tr>",
                htmlescape::encode_attribute(&child.with_prefix())
            );
        }
        w.push_str("</table>\n</body></html>\n");

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.insert("content-type", HeaderValue::from_static("text/html; charset=utf-8"));
        h.typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}
