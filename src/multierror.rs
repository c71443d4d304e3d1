//! Error collection for operations that touch more than one resource.
//!
//! COPY, MOVE and DELETE never stop at the first failing node. Each
//! failure is pushed into a [`MultiError`]; at the end the collector turns
//! into either a plain status response or a `207 Multi-Status` document.
use http::{Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::{fserror_to_status, DavError};
use crate::util::{new_xml_writer, xml_response, MemBuffer};
use crate::DavResult;

/// Optional `<D:error>` content of a response element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ErrorDetail {
    /// `<D:lock-token-submitted>` naming the locked resource.
    LockTokenSubmitted(DavPath),
}

/// One failed node.
#[derive(Debug, Clone)]
pub(crate) struct DavNodeError {
    pub path: DavPath,
    pub status: StatusCode,
    pub detail: Option<ErrorDetail>,
}

#[derive(Debug, Default)]
pub(crate) struct MultiError {
    errors: Vec<DavNodeError>,
}

impl MultiError {
    pub fn new() -> MultiError {
        MultiError::default()
    }

    /// Record `err` for `path`. Lock failures keep their detail.
    pub fn add_error(&mut self, path: &DavPath, err: &DavError) {
        let (status, detail) = match err {
            DavError::Locked(p) => (StatusCode::LOCKED, Some(ErrorDetail::LockTokenSubmitted(p.clone()))),
            DavError::FsError(e) => (fserror_to_status(e), None),
            e => (e.statuscode(), None),
        };
        debug!("multierror: {path:?} -> {status}");
        self.errors.push(DavNodeError {
            path: path.clone(),
            status,
            detail,
        });
    }

    /// `ok_status` with an empty body if nothing failed, else a 207.
    ///
    /// When the only failure is the request target itself there is nothing
    /// to itemize, and the error is returned as-is.
    pub fn into_response(self, top: &DavPath, ok_status: StatusCode) -> DavResult<Response<Body>> {
        if self.errors.is_empty() {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = ok_status;
            return Ok(resp);
        }
        if self.errors.len() == 1 && self.errors[0].path == *top {
            let e = &self.errors[0];
            return Err(match &e.detail {
                Some(ErrorDetail::LockTokenSubmitted(p)) => DavError::Locked(p.clone()),
                None => DavError::Status(e.status),
            });
        }
        multistatus_response(&self.errors)
    }
}

pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

fn write_error_detail(xw: &mut EventWriter<MemBuffer>, detail: &ErrorDetail) -> DavResult<()> {
    xw.write(XmlEvent::start_element("D:error"))?;
    match detail {
        ErrorDetail::LockTokenSubmitted(p) => {
            xw.write(XmlEvent::start_element("D:lock-token-submitted"))?;
            xw.write(XmlEvent::start_element("D:href"))?;
            xw.write(XmlEvent::characters(&p.with_prefix()))?;
            xw.write(XmlEvent::end_element())?;
            xw.write(XmlEvent::end_element())?;
        }
    }
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

/// Build a `207 Multi-Status` response with one `<D:response>` per entry.
pub(crate) fn multistatus_response(errors: &[DavNodeError]) -> DavResult<Response<Body>> {
    let mut xw = new_xml_writer()?;
    xw.write(XmlEvent::start_element("D:multistatus").ns("D", "DAV:"))?;
    for e in errors {
        xw.write(XmlEvent::start_element("D:response"))?;
        xw.write(XmlEvent::start_element("D:href"))?;
        xw.write(XmlEvent::characters(&e.path.with_prefix()))?;
        xw.write(XmlEvent::end_element())?;
        xw.write(XmlEvent::start_element("D:status"))?;
        xw.write(XmlEvent::characters(&status_line(e.status)))?;
        xw.write(XmlEvent::end_element())?;
        if let Some(detail) = &e.detail {
            write_error_detail(&mut xw, detail)?;
        }
        xw.write(XmlEvent::end_element())?;
    }
    xw.write(XmlEvent::end_element())?;

    Ok(xml_response(StatusCode::MULTI_STATUS, &mut xw))
}

/// Body for a top-level `423 Locked`.
pub(crate) fn lock_token_submitted_body(path: &DavPath) -> Body {
    crate::util::dav_xml_error(&format!(
        "<D:lock-token-submitted><D:href>{}</D:href></D:lock-token-submitted>",
        htmlescape::encode_minimal(&path.with_prefix())
    ))
}
