use std::io::{Cursor, Write};

use futures_util::future::{BoxFuture, FutureExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::RequestCtx;
use crate::davhandler::handle_lock::{write_lockdiscovery, write_supportedlock};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::ls::{DavLock, LockType};
use crate::multierror::status_line;
use crate::props::ResourceKind;
use crate::util::{new_xml_writer, xml_response, MemBuffer};
use crate::xmltree_ext::{element_from_bytes, ElementExt};
use crate::DavResult;

const NS_DAV: &str = "DAV:";

// live properties that come from the locksystem, not the property table.
const LOCK_PROPS: &[&str] = &["lockdiscovery", "supportedlock"];

#[derive(Debug)]
enum PropfindKind {
    AllProp,
    PropName,
    Prop(Vec<DavProp>),
}

// value of a property, as it will be rendered.
enum PropValue {
    Text(String),
    ResourceType(bool),
    LockDiscovery(Vec<DavLock>),
    SupportedLock(Vec<LockType>),
    Dead(Option<Vec<u8>>),
    // propname: no value at all.
    Empty,
}

fn prop_name(e: &Element) -> DavProp {
    DavProp {
        name: e.name.clone(),
        prefix: e.prefix.clone(),
        namespace: e.namespace.clone(),
        xml: None,
    }
}

fn dav_prop(name: &str) -> DavProp {
    DavProp {
        name: name.to_string(),
        prefix: Some("D".to_string()),
        namespace: Some(NS_DAV.to_string()),
        xml: None,
    }
}

fn is_dav_prop(p: &DavProp) -> bool {
    p.namespace.as_deref() == Some(NS_DAV)
}

fn parse_propfind(xmldata: &[u8]) -> DavResult<PropfindKind> {
    if xmldata.is_empty() {
        return Ok(PropfindKind::AllProp);
    }
    let tree = Element::parse2(Cursor::new(xmldata))?;
    if !tree.is_dav("propfind") {
        return Err(DavError::XmlParseError);
    }
    for elem in tree.child_elems() {
        if elem.is_dav("allprop") {
            return Ok(PropfindKind::AllProp);
        }
        if elem.is_dav("propname") {
            return Ok(PropfindKind::PropName);
        }
        if elem.is_dav("prop") {
            return Ok(PropfindKind::Prop(elem.child_elems().map(prop_name).collect()));
        }
    }
    Err(DavError::XmlParseError)
}

// start tag for a property element, declaring its namespace when needed.
fn write_prop_start<W: Write>(xw: &mut EventWriter<W>, p: &DavProp) -> DavResult<()> {
    if is_dav_prop(p) {
        let name = format!("D:{}", p.name);
        xw.write(XmlEvent::start_element(name.as_str()))?;
        return Ok(());
    }
    match &p.namespace {
        Some(ns) if !ns.is_empty() => {
            let pfx = match p.prefix.as_deref() {
                Some(pfx) if !pfx.is_empty() && pfx != "D" => pfx,
                _ => "X",
            };
            let name = format!("{}:{}", pfx, p.name);
            xw.write(XmlEvent::start_element(name.as_str()).ns(pfx, ns.as_str()))?;
        }
        _ => {
            xw.write(XmlEvent::start_element(p.name.as_str()))?;
        }
    }
    Ok(())
}

fn write_prop_name<W: Write>(xw: &mut EventWriter<W>, p: &DavProp) -> DavResult<()> {
    write_prop_start(xw, p)?;
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

fn write_prop<W: Write>(xw: &mut EventWriter<W>, p: &DavProp, value: &PropValue, prefix: &str) -> DavResult<()> {
    match value {
        PropValue::Dead(Some(xml)) => match element_from_bytes(xml) {
            Ok(elem) => elem.write_ev(xw)?,
            Err(_) => write_prop_name(xw, p)?,
        },
        PropValue::Dead(None) | PropValue::Empty => write_prop_name(xw, p)?,
        PropValue::Text(t) => {
            write_prop_start(xw, p)?;
            xw.write(XmlEvent::characters(t))?;
            xw.write(XmlEvent::end_element())?;
        }
        PropValue::ResourceType(is_coll) => {
            write_prop_start(xw, p)?;
            if *is_coll {
                xw.write(XmlEvent::start_element("D:collection"))?;
                xw.write(XmlEvent::end_element())?;
            }
            xw.write(XmlEvent::end_element())?;
        }
        PropValue::LockDiscovery(locks) => write_lockdiscovery(xw, locks, prefix)?,
        PropValue::SupportedLock(types) => write_supportedlock(xw, types)?,
    }
    Ok(())
}

fn write_propstat<W: Write>(
    xw: &mut EventWriter<W>,
    status: StatusCode,
    props: &[(DavProp, PropValue)],
    prefix: &str,
) -> DavResult<()> {
    xw.write(XmlEvent::start_element("D:propstat"))?;
    xw.write(XmlEvent::start_element("D:prop"))?;
    for (p, v) in props {
        write_prop(xw, p, v, prefix)?;
    }
    xw.write(XmlEvent::end_element())?;
    xw.write(XmlEvent::start_element("D:status"))?;
    xw.write(XmlEvent::characters(&status_line(status)))?;
    xw.write(XmlEvent::end_element())?;
    xw.write(XmlEvent::end_element())?;
    Ok(())
}

impl crate::DavHandler {
    fn is_protected(&self, kind: ResourceKind, p: &DavProp) -> bool {
        is_dav_prop(p) && (self.props.is_live(kind, &p.name) || LOCK_PROPS.contains(&p.name.as_str()))
    }

    async fn dead_props(&self, path: &DavPath, do_content: bool) -> Vec<DavProp> {
        if !self.fs.have_props(path).await {
            return Vec::new();
        }
        match self.fs.get_props(path, do_content).await {
            Ok(props) => props,
            Err(e) => {
                debug!("get_props {path:?}: {e:?}");
                Vec::new()
            }
        }
    }

    // value of one live property, None if it has none here.
    async fn live_prop(
        &self,
        ctx: &RequestCtx<'_>,
        path: &DavPath,
        meta: &dyn DavMetaData,
        name: &str,
    ) -> DavResult<Option<PropValue>> {
        let value = match (name, &self.ls) {
            ("lockdiscovery", Some(_)) => Some(PropValue::LockDiscovery(ctx.locks(path).await?)),
            ("supportedlock", Some(ls)) => Some(PropValue::SupportedLock(ls.supported_locks(path))),
            ("resourcetype", _) => Some(PropValue::ResourceType(meta.is_dir())),
            _ => match self.props.get_property(meta, path, name) {
                (StatusCode::OK, Some(v)) => Some(PropValue::Text(v)),
                _ => None,
            },
        };
        Ok(value)
    }

    async fn propfind_node<'a>(
        &'a self,
        xw: &mut EventWriter<MemBuffer>,
        ctx: &RequestCtx<'a>,
        kind: &PropfindKind,
        path: &DavPath,
        meta: &dyn DavMetaData,
    ) -> DavResult<()> {
        let rkind = ResourceKind::of(meta);
        let mut found: Vec<(DavProp, PropValue)> = Vec::new();
        let mut missing: Vec<(DavProp, PropValue)> = Vec::new();

        let mut live_names: Vec<&str> = self
            .props
            .defs(rkind)
            .iter()
            .filter(|d| d.in_allprop)
            .map(|d| d.name)
            .collect();
        if self.ls.is_some() {
            live_names.extend_from_slice(LOCK_PROPS);
        }

        match kind {
            PropfindKind::AllProp => {
                for name in live_names {
                    if let Some(v) = self.live_prop(ctx, path, meta, name).await? {
                        found.push((dav_prop(name), v));
                    }
                }
                for p in self.dead_props(path, true).await {
                    let xml = p.xml.clone();
                    found.push((p, PropValue::Dead(xml)));
                }
            }
            PropfindKind::PropName => {
                for name in live_names {
                    found.push((dav_prop(name), PropValue::Empty));
                }
                for p in self.dead_props(path, false).await {
                    found.push((p, PropValue::Empty));
                }
            }
            PropfindKind::Prop(wanted) => {
                let mut dead: Option<Vec<DavProp>> = None;
                for p in wanted {
                    if is_dav_prop(p) && (self.props.is_live(rkind, &p.name) || LOCK_PROPS.contains(&p.name.as_str())) {
                        match self.live_prop(ctx, path, meta, &p.name).await? {
                            Some(v) => found.push((p.clone(), v)),
                            None => missing.push((p.clone(), PropValue::Empty)),
                        }
                        continue;
                    }
                    if dead.is_none() {
                        dead = Some(self.dead_props(path, true).await);
                    }
                    let hit = dead.iter().flatten().find(|d| d.name == p.name && d.namespace == p.namespace);
                    match hit {
                        Some(d) => found.push((d.clone(), PropValue::Dead(d.xml.clone()))),
                        None => missing.push((p.clone(), PropValue::Empty)),
                    }
                }
            }
        }

        xw.write(XmlEvent::start_element("D:response"))?;
        xw.write(XmlEvent::start_element("D:href"))?;
        xw.write(XmlEvent::characters(&path.with_prefix()))?;
        xw.write(XmlEvent::end_element())?;
        if !found.is_empty() || missing.is_empty() {
            write_propstat(xw, StatusCode::OK, &found, &self.prefix)?;
        }
        if !missing.is_empty() {
            write_propstat(xw, StatusCode::NOT_FOUND, &missing, &self.prefix)?;
        }
        xw.write(XmlEvent::end_element())?;
        Ok(())
    }

    fn propfind_children<'a>(
        &'a self,
        xw: &'a mut EventWriter<MemBuffer>,
        ctx: &'a RequestCtx<'a>,
        kind: &'a PropfindKind,
        path: DavPath,
        depth: Depth,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            let children = self.read_children(&path).await?;
            for (child, meta) in children {
                self.propfind_node(xw, ctx, kind, &child, &*meta).await?;
                if meta.is_dir() && depth == Depth::Infinity {
                    self.propfind_children(xw, ctx, kind, child, depth).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx<'_>,
        path: &DavPath,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = req.headers().typed_get::<Depth>().unwrap_or(Depth::Infinity);
        let kind = parse_propfind(xmldata)?;
        debug!("propfind {path:?} depth {depth:?} {kind:?}");

        let meta = self.fs.metadata(path).await?;
        let mut path = path.clone();
        if meta.is_dir() {
            path = path.as_collection();
        }

        let mut xw = new_xml_writer()?;
        xw.write(XmlEvent::start_element("D:multistatus").ns("D", NS_DAV))?;
        self.propfind_node(&mut xw, ctx, &kind, &path, &*meta).await?;
        if meta.is_dir() && depth != Depth::Zero {
            self.propfind_children(&mut xw, ctx, &kind, path, depth).await?;
        }
        xw.write(XmlEvent::end_element())?;

        Ok(xml_response(StatusCode::MULTI_STATUS, &mut xw))
    }

    pub(crate) async fn handle_proppatch(&self, path: &DavPath, xmldata: &[u8]) -> DavResult<Response<Body>> {
        let meta = self.fs.metadata(path).await?;
        let rkind = ResourceKind::of(&*meta);

        let tree = Element::parse2(Cursor::new(xmldata))?;
        if !tree.is_dav("propertyupdate") {
            return Err(DavError::XmlParseError);
        }

        let mut patch = Vec::new();
        let mut forbidden = Vec::new();
        for elem in tree.child_elems() {
            let set = if elem.is_dav("set") {
                true
            } else if elem.is_dav("remove") {
                false
            } else {
                continue;
            };
            for prop in elem.child_elems().filter(|e| e.is_dav("prop")).flat_map(|e| e.child_elems()) {
                let mut p = prop_name(prop);
                if self.is_protected(rkind, &p) {
                    forbidden.push(p);
                    continue;
                }
                if set {
                    p.xml = Some(prop.to_bytes()?);
                }
                patch.push((set, p));
            }
        }

        // all or nothing.
        let results: Vec<(StatusCode, DavProp)> = if !forbidden.is_empty() {
            let mut r: Vec<_> = forbidden.into_iter().map(|p| (StatusCode::FORBIDDEN, p)).collect();
            r.extend(patch.into_iter().map(|(_, p)| (StatusCode::FAILED_DEPENDENCY, p)));
            r
        } else if !self.fs.have_props(path).await {
            patch.into_iter().map(|(_, p)| (StatusCode::FORBIDDEN, p)).collect()
        } else {
            self.fs.patch_props(path, patch).await?
        };

        // group by status, in order of first appearance.
        let mut groups: Vec<(StatusCode, Vec<(DavProp, PropValue)>)> = Vec::new();
        for (status, p) in results {
            let p = DavProp { xml: None, ..p };
            match groups.iter_mut().find(|(s, _)| *s == status) {
                Some((_, props)) => props.push((p, PropValue::Empty)),
                None => groups.push((status, vec![(p, PropValue::Empty)])),
            }
        }

        let mut path = path.clone();
        if meta.is_dir() {
            path = path.as_collection();
        }
        let mut xw = new_xml_writer()?;
        xw.write(XmlEvent::start_element("D:multistatus").ns("D", NS_DAV))?;
        xw.write(XmlEvent::start_element("D:response"))?;
        xw.write(XmlEvent::start_element("D:href"))?;
        xw.write(XmlEvent::characters(&path.with_prefix()))?;
        xw.write(XmlEvent::end_element())?;
        for (status, props) in &groups {
            write_propstat(&mut xw, *status, props, &self.prefix)?;
        }
        xw.write(XmlEvent::end_element())?;
        xw.write(XmlEvent::end_element())?;

        Ok(xml_response(StatusCode::MULTI_STATUS, &mut xw))
    }
}
