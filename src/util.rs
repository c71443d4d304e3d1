use std::io::{Cursor, Write};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use http::{HeaderValue, Response, StatusCode};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::body::Body;
use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    /// A webdav method, or a set of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const WEBDAV_RO = Self::HEAD.bits() | Self::GET.bits()
            | Self::OPTIONS.bits() | Self::PROPFIND.bits();
        const WEBDAV_BODY = Self::PUT.bits() | Self::PROPFIND.bits()
            | Self::PROPPATCH.bits() | Self::LOCK.bits();
        const LOCKING = Self::LOCK.bits() | Self::UNLOCK.bits();
        // methods that never go through the lock-check gate.
        const NO_LOCK_CHECK = Self::WEBDAV_RO.bits() | Self::UNLOCK.bits();
    }
}

// in the order they are listed in an Allow header.
const METHODS: [(DavMethod, &str); 12] = [
    (DavMethod::OPTIONS, "OPTIONS"),
    (DavMethod::HEAD, "HEAD"),
    (DavMethod::GET, "GET"),
    (DavMethod::PUT, "PUT"),
    (DavMethod::DELETE, "DELETE"),
    (DavMethod::MKCOL, "MKCOL"),
    (DavMethod::PROPFIND, "PROPFIND"),
    (DavMethod::PROPPATCH, "PROPPATCH"),
    (DavMethod::COPY, "COPY"),
    (DavMethod::MOVE, "MOVE"),
    (DavMethod::LOCK, "LOCK"),
    (DavMethod::UNLOCK, "UNLOCK"),
];

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();

    /// GET, HEAD and PROPFIND: a matching If-None-Match means 304.
    pub fn is_safe(self) -> bool {
        DavMethod::GET.union(DavMethod::HEAD).union(DavMethod::PROPFIND).contains(self)
    }

    /// Comma separated method names, e.g. for an `Allow` header.
    pub fn names(self) -> String {
        METHODS
            .iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromStr for DavMethod {
    type Err = DavError;

    fn from_str(s: &str) -> DavResult<DavMethod> {
        METHODS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(m, _)| *m)
            .ok_or(DavError::UnknownDavMethod)
    }
}

impl TryFrom<&http::Method> for DavMethod {
    type Error = DavError;

    fn try_from(m: &http::Method) -> DavResult<DavMethod> {
        m.as_str().parse()
    }
}

/// Map a request method to a [`DavMethod`].
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    DavMethod::try_from(m)
}

/// An `<D:error>` document with `body` as its content.
pub fn dav_xml_error(body: &str) -> Body {
    Body::from(format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n<D:error xmlns:D=\"DAV:\">\n{body}\n</D:error>\n"
    ))
}

fn to_utc(t: SystemTime) -> OffsetDateTime {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| OffsetDateTime::from_unix_timestamp(d.as_secs() as i64).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// RFC 1123 date, as used by `getlastmodified` and HTTP headers.
pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let mut v = Vec::new();
    headers::Date::from(t).encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// RFC 3339 date, as used by `creationdate`.
pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    to_utc(t).format(&Rfc3339).unwrap_or_default()
}

/// Start an XML document for a response body.
pub(crate) fn new_xml_writer() -> DavResult<EventWriter<MemBuffer>> {
    let config = EmitterConfig {
        perform_indent: true,
        ..EmitterConfig::default()
    };
    let mut xw = EventWriter::new_with_config(MemBuffer::default(), config);
    xw.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(xw)
}

/// Wrap what was written to `xw` into a response.
pub(crate) fn xml_response(status: StatusCode, xw: &mut EventWriter<MemBuffer>) -> Response<Body> {
    let mut resp = Response::new(Body::from(xw.inner_mut().take()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    resp
}

/// In-memory sink for the XML writer.
#[derive(Clone, Default)]
pub struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    /// Everything written so far. Leaves the buffer empty.
    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn dates() {
        assert_eq!(systemtime_to_rfc3339(UNIX_EPOCH), "1970-01-01T00:00:00Z");
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(systemtime_to_httpdate(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn method_classes() {
        assert!(DavMethod::PROPFIND.is_safe());
        assert!(!DavMethod::PUT.is_safe());
        assert!(DavMethod::NO_LOCK_CHECK.contains(DavMethod::UNLOCK));
        assert!(!DavMethod::NO_LOCK_CHECK.contains(DavMethod::DELETE));
        let m = http::Method::from_bytes(b"MKCOL").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::MKCOL);
        assert!(dav_method(&http::Method::PATCH).is_err());
    }

    #[test]
    fn allow_names() {
        let set = DavMethod::GET | DavMethod::OPTIONS | DavMethod::LOCK;
        assert_eq!(set.names(), "OPTIONS,GET,LOCK");
        assert_eq!(DavMethod::WEBDAV_RW.names().split(',').count(), 12);
    }
}
