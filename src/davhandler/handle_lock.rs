use std::io::{Cursor, Write};
use std::time::{Duration, SystemTime};

use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::RequestCtx;
use crate::davheaders::{self, DavTimeout, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::ls::*;
use crate::util::{new_xml_writer, xml_response};
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

fn empty_elem<W: Write>(xw: &mut EventWriter<W>, name: &str) -> DavResult<()> {
    xw.write(XmlEvent::start_element(name))?;
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

fn text_elem<W: Write>(xw: &mut EventWriter<W>, name: &str, text: &str) -> DavResult<()> {
    xw.write(XmlEvent::start_element(name))?;
    xw.write(XmlEvent::characters(text))?;
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

fn href_elem<W: Write>(xw: &mut EventWriter<W>, name: &str, href: &str) -> DavResult<()> {
    xw.write(XmlEvent::start_element(name))?;
    text_elem(xw, "D:href", href)?;
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

fn scope_name(t: LockType) -> &'static str {
    match t {
        LockType::Exclusive => "D:exclusive",
        LockType::Shared => "D:shared",
    }
}

// "Second-N" counts down from the issue date.
fn timeout_value(lock: &DavLock) -> String {
    match lock.expires_at() {
        None => "Infinite".to_string(),
        Some(at) => {
            let left = at
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO);
            format!("Second-{}", left.as_secs())
        }
    }
}

/// One `<D:activelock>`. `prefix` is the mount prefix for the lock root href.
pub(crate) fn write_activelock<W: Write>(
    xw: &mut EventWriter<W>,
    lock: &DavLock,
    prefix: &str,
) -> DavResult<()> {
    xw.write(XmlEvent::start_element("D:activelock"))?;

    xw.write(XmlEvent::start_element("D:locktype"))?;
    empty_elem(xw, "D:write")?;
    xw.write(XmlEvent::end_element())?;

    xw.write(XmlEvent::start_element("D:lockscope"))?;
    empty_elem(xw, scope_name(lock.lock_type))?;
    xw.write(XmlEvent::end_element())?;

    text_elem(xw, "D:depth", if lock.recursive { "infinity" } else { "0" })?;
    if let Some(owner) = &lock.owner {
        owner.write_ev(xw)?;
    }
    text_elem(xw, "D:timeout", &timeout_value(lock))?;
    href_elem(xw, "D:locktoken", &lock.urn())?;
    href_elem(xw, "D:lockroot", &lock.path.under_prefix(prefix).with_prefix())?;

    xw.write(XmlEvent::end_element())?;
    Ok(())
}

/// `<D:lockdiscovery>` with all `locks`.
pub(crate) fn write_lockdiscovery<W: Write>(
    xw: &mut EventWriter<W>,
    locks: &[DavLock],
    prefix: &str,
) -> DavResult<()> {
    xw.write(XmlEvent::start_element("D:lockdiscovery"))?;
    for lock in locks {
        write_activelock(xw, lock, prefix)?;
    }
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

/// `<D:supportedlock>` listing one `<D:lockentry>` per lock type.
pub(crate) fn write_supportedlock<W: Write>(xw: &mut EventWriter<W>, types: &[LockType]) -> DavResult<()> {
    xw.write(XmlEvent::start_element("D:supportedlock"))?;
    for t in types {
        xw.write(XmlEvent::start_element("D:lockentry"))?;
        xw.write(XmlEvent::start_element("D:lockscope"))?;
        empty_elem(xw, scope_name(*t))?;
        xw.write(XmlEvent::end_element())?;
        xw.write(XmlEvent::start_element("D:locktype"))?;
        empty_elem(xw, "D:write")?;
        xw.write(XmlEvent::end_element())?;
        xw.write(XmlEvent::end_element())?;
    }
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

// what a LOCK request body asks for.
struct LockInfo {
    lock_type: LockType,
    owner: Option<Element>,
}

fn parse_lockinfo(xmldata: &[u8]) -> DavResult<LockInfo> {
    let tree = Element::parse2(Cursor::new(xmldata))?;
    if !tree.is_dav("lockinfo") {
        return Err(DavError::XmlParseError);
    }
    let mut lock_type = None;
    let mut write = false;
    let mut owner = None;
    for elem in tree.child_elems() {
        if elem.is_dav("lockscope") {
            for e in elem.child_elems() {
                if e.is_dav("exclusive") {
                    lock_type = Some(LockType::Exclusive);
                } else if e.is_dav("shared") {
                    lock_type = Some(LockType::Shared);
                }
            }
        } else if elem.is_dav("locktype") {
            write = elem.child_elems().any(|e| e.is_dav("write"));
        } else if elem.is_dav("owner") {
            owner = Some(elem.clone());
        }
    }
    match lock_type {
        Some(lock_type) if write => Ok(LockInfo { lock_type, owner }),
        _ => Err(DavError::XmlParseError),
    }
}

impl crate::DavHandler {
    fn lock_response(&self, lock: &DavLock, status: StatusCode) -> DavResult<Response<Body>> {
        let mut xw = new_xml_writer()?;
        xw.write(XmlEvent::start_element("D:prop").ns("D", "DAV:"))?;
        write_lockdiscovery(&mut xw, std::slice::from_ref(lock), &self.prefix)?;
        xw.write(XmlEvent::end_element())?;
        Ok(xml_response(status, &mut xw))
    }

    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx<'_>,
        path: &DavPath,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let ls = match &self.ls {
            Some(ls) => ls.clone(),
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };
        let timeout = req
            .headers()
            .typed_get::<DavTimeout>()
            .map(|t| t.0)
            .unwrap_or(Duration::ZERO);

        // an empty body means refresh.
        if xmldata.is_empty() {
            let tokens: Vec<String> = match ctx.if_header() {
                Some(h) => h.tokens().map(|t| t.to_string()).collect(),
                None => Vec::new(),
            };
            if tokens.is_empty() {
                return Err(StatusCode::BAD_REQUEST.into());
            }
            for token in &tokens {
                if let Ok(lock) = ls.refresh(path, token, timeout).await? {
                    debug!("refreshed lock {} on {path:?}", lock.token);
                    return self.lock_response(&lock, StatusCode::OK);
                }
            }
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        let recursive = match req.headers().typed_get::<Depth>() {
            None | Some(Depth::Infinity) => true,
            Some(Depth::Zero) => false,
            Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let info = parse_lockinfo(xmldata)?;

        let exists = match self.fs.metadata(path).await {
            Ok(_) => true,
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        if !exists && !self.has_parent(path).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let principal = self.principal.as_deref().map(|p| p.as_str());
        let lock = match ls
            .lock(path, info.lock_type, info.owner.as_ref(), principal, recursive, timeout)
            .await?
        {
            Ok(lock) => lock,
            Err(status) => {
                debug!("lock on {path:?} refused: {status}");
                return Err(status.into());
            }
        };
        debug!("granted {:?} lock {} on {path:?}", lock.lock_type, lock.token);

        // locking an unmapped url creates an empty resource.
        if !exists {
            let oo = OpenOptions {
                write: true,
                create_new: true,
                ..OpenOptions::default()
            };
            let created = match self.fs.open(path, oo).await {
                Ok(mut file) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = created {
                let _ = ls.unlock(path, &lock.token).await;
                return Err(e.into());
            }
        }

        let status = if exists {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };
        let mut res = self.lock_response(&lock, status)?;
        if let Ok(v) = HeaderValue::from_str(&format!("<{}>", lock.urn())) {
            res.headers_mut().insert("lock-token", v);
        }
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        let ls = match &self.ls {
            Some(ls) => ls.clone(),
            None => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        };
        let token = match req.headers().typed_get::<davheaders::LockToken>() {
            Some(t) => t,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        match ls.unlock(path, token_id(&token.0)).await? {
            StatusCode::NO_CONTENT => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NO_CONTENT;
                Ok(res)
            }
            status => Err(status.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockinfo() {
        let body = br#"<?xml version="1.0" encoding="utf-8" ?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:shared/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>http://example.org/~ejw</D:href></D:owner>
            </D:lockinfo>"#;
        let info = parse_lockinfo(body).unwrap();
        assert_eq!(info.lock_type, LockType::Shared);
        assert!(info.owner.unwrap().is_dav("owner"));

        let no_write = br#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope></D:lockinfo>"#;
        assert!(parse_lockinfo(no_write).is_err());
        assert!(parse_lockinfo(b"<lockinfo/>").is_err());
    }

    #[test]
    fn activelock_xml() {
        let lock = DavLock::new(
            &DavPath::new("/a/b").unwrap(),
            LockType::Exclusive,
            None,
            None,
            true,
            Duration::from_secs(60),
        );
        let mut buf = Vec::new();
        let mut xw = EventWriter::new(&mut buf);
        xw.write(XmlEvent::start_element("D:prop").ns("D", "DAV:")).unwrap();
        write_lockdiscovery(&mut xw, &[lock.clone()], "/dav").unwrap();
        xw.write(XmlEvent::end_element()).unwrap();
        drop(xw);
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains(&lock.urn()));
        assert!(s.contains("<D:href>/dav/a/b</D:href>"));
        assert!(s.contains("<D:depth>infinity</D:depth>"));
        assert!(s.contains("Second-"));
    }
}
