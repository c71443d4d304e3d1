use std::borrow::Cow;
use std::io::{Read, Write};

use xml::writer::{EmitterConfig, EventWriter, XmlEvent};
use xmltree::{Element, XMLNode};

use crate::{DavError, DavResult};

// prefixes that xml-rs puts in every namespace map.
const IMPLIED_PREFIXES: &[&str] = &["xml", "xmlns"];

pub(crate) trait ElementExt {
    /// Parse a request body.
    fn parse2<R: Read>(r: R) -> DavResult<Element>;
    /// Child elements, skipping text and comments.
    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_>;
    /// Is this `name` in the `DAV:` namespace.
    fn is_dav(&self, name: &str) -> bool;
    /// Write the element through an existing event writer.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
    /// Serialize the element on its own, without XML declaration.
    fn to_bytes(&self) -> DavResult<Vec<u8>>;
}

impl ElementExt for Element {
    fn parse2<R: Read>(r: R) -> DavResult<Element> {
        let e = Element::parse(r)?;
        Ok(e)
    }

    fn child_elems(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(self.children.iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        }))
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some("DAV:")
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let name: Cow<str> = match &self.prefix {
            Some(p) => Cow::Owned(format!("{}:{}", p, self.name)),
            None => Cow::Borrowed(&self.name),
        };
        let mut start = XmlEvent::start_element(name.as_ref());
        if let Some(ns) = &self.namespaces {
            for (prefix, uri) in ns.0.iter() {
                if IMPLIED_PREFIXES.contains(&prefix.as_str()) || uri.is_empty() {
                    continue;
                }
                start = if prefix.is_empty() {
                    start.default_ns(uri.as_str())
                } else {
                    start.ns(prefix.as_str(), uri.as_str())
                };
            }
        }
        for (k, v) in self.attributes.iter() {
            start = start.attr(k.as_str(), v.as_str());
        }
        emitter.write(start)?;
        for node in &self.children {
            match node {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlEvent::characters(t))?,
                XMLNode::CData(t) => emitter.write(XmlEvent::cdata(t))?,
                _ => {}
            }
        }
        emitter.write(XmlEvent::end_element())
    }

    fn to_bytes(&self) -> DavResult<Vec<u8>> {
        let mut buf = Vec::new();
        let mut emitter = EventWriter::new_with_config(
            &mut buf,
            EmitterConfig {
                write_document_declaration: false,
                ..EmitterConfig::default()
            },
        );
        self.write_ev(&mut emitter)?;
        drop(emitter);
        Ok(buf)
    }
}

/// Parse what [`ElementExt::to_bytes`] wrote.
pub(crate) fn element_from_bytes(data: &[u8]) -> DavResult<Element> {
    Element::parse(data).map_err(|_| DavError::XmlParseError)
}
