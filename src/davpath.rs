//! Utility module to handle the path part of an URL as a filesytem path.
//!
//! A [`DavPath`] is always absolute and percent-decoded. Two paths are
//! equal when their segments are equal; the trailing slash (collection
//! hint) and the mount prefix are carried along but not compared.
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use percent_encoding as pct;

use crate::errors::DavError;

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// URL path, with hidden prefix.
#[derive(Clone)]
pub struct DavPath {
    segments: Vec<String>,
    collection: bool,
    prefix: String,
}

impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.segments == other.segments
    }
}

impl Eq for DavPath {}

impl Hash for DavPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_url_string())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

// split a decoded path into normalized segments.
fn normalize(path: &str) -> Result<Vec<String>, DavError> {
    let mut segments: Vec<String> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(DavError::ForbiddenPath);
                }
            }
            s => {
                if s.contains('\0') {
                    return Err(DavError::InvalidPath);
                }
                segments.push(s.to_string());
            }
        }
    }
    Ok(segments)
}

fn decode(src: &str) -> Result<String, DavError> {
    let raw = src.split(['?', '#']).next().unwrap_or("");
    pct::percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| DavError::InvalidPath)
}

impl DavPath {
    /// Parse a raw request path. It must start with `/`.
    pub fn new(src: &str) -> Result<DavPath, DavError> {
        if !src.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let decoded = decode(src)?;
        let collection = decoded.ends_with('/');
        let segments = normalize(&decoded)?;
        Ok(DavPath {
            collection: collection && !segments.is_empty(),
            segments,
            prefix: String::new(),
        })
    }

    /// The root path `/`.
    pub fn root() -> DavPath {
        DavPath {
            segments: Vec::new(),
            collection: false,
            prefix: String::new(),
        }
    }

    /// from URL encoded path and non-encoded prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, DavError> {
        if !src.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let prefix = prefix.trim_end_matches('/');
        let decoded = decode(src)?;
        let rest = if prefix.is_empty() {
            decoded.as_str()
        } else {
            match decoded.strip_prefix(prefix) {
                Some(r) if r.is_empty() || r.starts_with('/') => r,
                _ => return Err(DavError::IllegalPath),
            }
        };
        let rest = if rest.is_empty() { "/" } else { rest };
        let mut path = DavPath::new(&pct::utf8_percent_encode(rest, PATH_ENCODE_SET).to_string())?;
        path.prefix = prefix.to_string();
        Ok(path)
    }

    /// from request.uri
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, DavError> {
        match uri.path() {
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(DavError::InvalidPath),
        }
    }

    /// Parent path. `None` only for the root.
    pub fn parent(&self) -> Option<DavPath> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(DavPath {
            collection: !segments.is_empty(),
            segments,
            prefix: self.prefix.clone(),
        })
    }

    /// Append a (non-encoded) relative segment, which may itself contain slashes.
    pub fn combine(&self, segment: &str) -> DavPath {
        let mut segments = self.segments.clone();
        segments.extend(
            segment
                .split('/')
                .filter(|s| !s.is_empty() && *s != ".")
                .map(|s| s.to_string()),
        );
        DavPath {
            collection: segment.ends_with('/'),
            segments,
            prefix: self.prefix.clone(),
        }
    }

    /// Strip `base` off the front of this path. If `base` is not a
    /// structural prefix, the path is returned unchanged.
    pub fn relative_to(&self, base: &DavPath) -> DavPath {
        if !base.is_ancestor_or_self(self) {
            return self.clone();
        }
        DavPath {
            segments: self.segments[base.segments.len()..].to_vec(),
            collection: self.collection,
            prefix: self.prefix.clone(),
        }
    }

    /// Is `self` a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        self.segments.len() < other.segments.len() && other.segments.starts_with(&self.segments)
    }

    pub fn is_ancestor_or_self(&self, other: &DavPath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// All prefixes of this path, root first, the path itself last.
    pub fn ancestors(&self) -> Vec<DavPath> {
        (0..=self.segments.len())
            .map(|n| DavPath {
                segments: self.segments[..n].to_vec(),
                collection: n < self.segments.len(),
                prefix: self.prefix.clone(),
            })
            .collect()
    }

    /// Number of segments. The root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, empty for the root.
    pub fn file_name(&self) -> &str {
        self.segments.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// Was the path given with a trailing slash.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Same path, marked as a collection.
    pub fn as_collection(&self) -> DavPath {
        let mut p = self.clone();
        p.collection = !p.segments.is_empty();
        p
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Same path, mounted under `prefix`.
    pub fn under_prefix(&self, prefix: &str) -> DavPath {
        let mut p = self.clone();
        p.prefix = prefix.trim_end_matches('/').to_string();
        p
    }

    /// The path without prefix, decoded.
    pub fn as_str(&self) -> String {
        let mut s = String::from("/");
        s.push_str(&self.segments.join("/"));
        if self.collection {
            s.push('/');
        }
        s
    }

    /// as URL encoded string, without prefix.
    pub fn as_url_string(&self) -> String {
        pct::utf8_percent_encode(&self.as_str(), PATH_ENCODE_SET).to_string()
    }

    /// as URL encoded string, with prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let p = pct::utf8_percent_encode(&self.prefix, PATH_ENCODE_SET).to_string();
        p + &self.as_url_string()
    }

    /// Same as `as_url_string_with_prefix`, handy for hrefs.
    pub fn with_prefix(&self) -> String {
        self.as_url_string_with_prefix()
    }

    /// Relative path usable for joining onto a local base directory.
    pub fn as_rel_ospath(&self) -> PathBuf {
        self.segments.iter().fold(PathBuf::new(), |mut p, s| {
            p.push(Path::new(s));
            p
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[test]
    fn parse_and_normalize() {
        assert!(DavPath::new("a/b").is_err());
        assert!(DavPath::new("/..").is_err());
        assert_eq!(p("//a///b/./c/../d"), p("/a/b/d"));
        assert_eq!(p("/a%20b").segments(), &["a b".to_string()]);
        assert_eq!(p("/a/b/"), p("/a/b"));
        assert!(p("/a/b/").is_collection());
        assert_eq!(p("/").as_url_string(), "/");
    }

    #[test]
    fn parent_combine_relative() {
        assert_eq!(p("/a/b").parent(), Some(p("/a")));
        assert_eq!(p("/a").parent(), Some(DavPath::root()));
        assert_eq!(DavPath::root().parent(), None);

        assert_eq!(p("/a").combine("b//c"), p("/a/b/c"));
        assert_eq!(DavPath::root().combine("/x/"), p("/x"));

        assert_eq!(p("/a/b/c").relative_to(&p("/a")), p("/b/c"));
        assert_eq!(p("/a/b/c").relative_to(&p("/a/b/c")), DavPath::root());
        assert_eq!(p("/ab/c").relative_to(&p("/a")), p("/ab/c"));
    }

    #[test]
    fn ancestry() {
        assert!(p("/a").is_ancestor_of(&p("/a/b")));
        assert!(!p("/a").is_ancestor_of(&p("/a")));
        assert!(!p("/a").is_ancestor_of(&p("/ab")));
        assert!(DavPath::root().is_ancestor_of(&p("/x")));
        let anc = p("/a/b").ancestors();
        assert_eq!(anc, vec![DavPath::root(), p("/a"), p("/a/b")]);
        assert_eq!(p("/a/b").depth(), 2);
    }

    #[test]
    fn prefix() {
        let path = DavPath::from_str_and_prefix("/dav/x%20y/z", "/dav/").unwrap();
        assert_eq!(path, p("/x y/z"));
        assert_eq!(path.with_prefix(), "/dav/x%20y/z");
        assert!(DavPath::from_str_and_prefix("/davx/z", "/dav").is_err());
        assert_eq!(DavPath::from_str_and_prefix("/dav", "/dav").unwrap(), DavPath::root());
    }
}
