//! Live properties.
//!
//! The set of live properties each kind of resource exposes is an explicit
//! [`PropertyTable`], built once when the handler is constructed and shared
//! by reference. There is no global registry.
use std::sync::Arc;
use std::time::SystemTime;

use http::StatusCode;

use crate::davpath::DavPath;
use crate::fs::DavMetaData;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};

/// Kind of resource, selects the row of the property table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Collection,
    Document,
}

impl ResourceKind {
    pub fn of(meta: &dyn DavMetaData) -> ResourceKind {
        if meta.is_dir() {
            ResourceKind::Collection
        } else {
            ResourceKind::Document
        }
    }
}

/// Getter for one property. `None` means "not available on this resource".
pub type PropGetter = fn(&dyn DavMetaData, &DavPath) -> Option<String>;

/// A live property in the `DAV:` namespace.
#[derive(Clone)]
pub struct PropertyDef {
    pub name: &'static str,
    pub getter: PropGetter,
    /// Included in `allprop`.
    pub in_allprop: bool,
}

impl std::fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDef").field("name", &self.name).finish()
    }
}

/// Live properties per resource kind.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    collection: Vec<PropertyDef>,
    document: Vec<PropertyDef>,
}

fn etag(meta: &dyn DavMetaData, _: &DavPath) -> Option<String> {
    meta.etag().map(|t| format!("\"{t}\""))
}

fn last_modified(meta: &dyn DavMetaData, _: &DavPath) -> Option<String> {
    meta.modified().ok().map(systemtime_to_httpdate)
}

fn creation_date(meta: &dyn DavMetaData, _: &DavPath) -> Option<String> {
    meta.created().ok().map(systemtime_to_rfc3339)
}

fn content_length(meta: &dyn DavMetaData, _: &DavPath) -> Option<String> {
    Some(meta.len().to_string())
}

fn content_type(_: &dyn DavMetaData, path: &DavPath) -> Option<String> {
    Some(
        mime_guess::from_path(path.file_name())
            .first_or_octet_stream()
            .to_string(),
    )
}

fn display_name(_: &dyn DavMetaData, path: &DavPath) -> Option<String> {
    Some(path.file_name().to_string())
}

// rendered as child elements by the propfind writer.
fn resource_type(meta: &dyn DavMetaData, _: &DavPath) -> Option<String> {
    if meta.is_dir() {
        Some("collection".to_string())
    } else {
        Some(String::new())
    }
}

fn def(name: &'static str, getter: PropGetter) -> PropertyDef {
    PropertyDef {
        name,
        getter,
        in_allprop: true,
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        let common = vec![
            def("creationdate", creation_date),
            def("displayname", display_name),
            def("getetag", etag),
            def("getlastmodified", last_modified),
            def("resourcetype", resource_type),
        ];
        let mut document = common.clone();
        document.push(def("getcontentlength", content_length));
        document.push(def("getcontenttype", content_type));
        PropertyTable {
            collection: common,
            document,
        }
    }
}

impl PropertyTable {
    pub fn new(collection: Vec<PropertyDef>, document: Vec<PropertyDef>) -> PropertyTable {
        PropertyTable {
            collection,
            document,
        }
    }

    pub fn defs(&self, kind: ResourceKind) -> &[PropertyDef] {
        match kind {
            ResourceKind::Collection => &self.collection,
            ResourceKind::Document => &self.document,
        }
    }
}

/// Looks up live properties through a shared [`PropertyTable`].
#[derive(Debug, Clone)]
pub struct PropertyManager {
    table: Arc<PropertyTable>,
}

impl PropertyManager {
    pub fn new(table: Arc<PropertyTable>) -> PropertyManager {
        PropertyManager { table }
    }

    /// Value of a live property. `404` if the resource kind has no such
    /// property or it has no value here.
    pub fn get_property(
        &self,
        meta: &dyn DavMetaData,
        path: &DavPath,
        name: &str,
    ) -> (StatusCode, Option<String>) {
        let kind = ResourceKind::of(meta);
        match self.table.defs(kind).iter().find(|d| d.name == name) {
            Some(d) => match (d.getter)(meta, path) {
                Some(v) => (StatusCode::OK, Some(v)),
                None => (StatusCode::NOT_FOUND, None),
            },
            None => (StatusCode::NOT_FOUND, None),
        }
    }

    /// Is `name` a live (and so protected) property for this kind.
    pub fn is_live(&self, kind: ResourceKind, name: &str) -> bool {
        self.table.defs(kind).iter().any(|d| d.name == name)
    }

    pub fn defs(&self, kind: ResourceKind) -> &[PropertyDef] {
        self.table.defs(kind)
    }

    /// The ETag property, without quotes.
    pub fn etag(&self, meta: &dyn DavMetaData, path: &DavPath) -> Option<String> {
        match self.get_property(meta, path, "getetag") {
            (StatusCode::OK, Some(v)) => Some(v.trim_matches('"').to_string()),
            _ => None,
        }
    }

    /// The Last-Modified property, as a timestamp.
    pub fn last_modified(&self, meta: &dyn DavMetaData, path: &DavPath) -> Option<SystemTime> {
        match self.get_property(meta, path, "getlastmodified") {
            (StatusCode::OK, Some(v)) => httpdate_to_systemtime(&v),
            _ => None,
        }
    }
}

fn httpdate_to_systemtime(s: &str) -> Option<SystemTime> {
    use headers::{Header, HeaderValue};
    let v = HeaderValue::from_str(s).ok()?;
    let d = headers::LastModified::decode(&mut std::iter::once(&v)).ok()?;
    Some(d.into())
}
