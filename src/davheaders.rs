//! WebDAV request headers: `Depth`, `Destination`, `Overwrite`,
//! `Lock-Token`, `Timeout`, `If`, and the entity-tag lists of
//! `If-Match` / `If-None-Match`.
//!
//! All parsers report failure through `headers::Error` (or `None` for
//! [`If::parse`]); none of them panic on bad input.
use std::fmt::Display;
use std::time::Duration;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use regex::Regex;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref IF_MATCH: HeaderName = HeaderName::from_static("if-match");
    static ref IF_NONE_MATCH: HeaderName = HeaderName::from_static("if-none-match");
    static ref RE_SECOND: Regex = Regex::new(r"^(?i)second-(\d+)$").unwrap();
}

// helper: the single header value as &str.
fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    v.to_str().map(|s| s.trim()).map_err(|_| invalid())
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn encode_str<E: Extend<HeaderValue>>(values: &mut E, s: impl Display) {
    if let Ok(v) = HeaderValue::from_str(&s.to_string()) {
        values.extend(std::iter::once(v));
    }
}

/// `Depth:` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.to_ascii_lowercase().as_str() {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// `Destination:` header. Either an absolute URI or an absolute path;
/// we keep the (still percent-encoded) path part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        if s.starts_with('/') {
            return Ok(Destination(s.to_string()));
        }
        let url = url::Url::parse(s).map_err(|_| invalid())?;
        if !url.has_host() {
            return Err(invalid());
        }
        Ok(Destination(url.path().to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// `Overwrite:` header, `T` or `F`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "F" | "f" => Ok(Overwrite(false)),
            "T" | "t" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// `Lock-Token:` header, `<urn:uuid:...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(t) if !t.is_empty() => Ok(LockToken(t.to_string())),
            _ => Err(invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, format!("<{}>", self.0));
    }
}

/// `Timeout:` header. `Infinite` is `Duration::ZERO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavTimeout(pub Duration);

impl DavTimeout {
    /// Largest `Second-N` we accept, RFC 4918 10.7. Anything above is
    /// clamped to it.
    pub const MAX_SECONDS: u64 = u32::MAX as u64;

    /// Parse a `Timeout:` value. The first usable entry of the
    /// comma-separated list wins; `Second-0` is rounded up to one second
    /// so it cannot be confused with infinite.
    pub fn parse(s: &str) -> Option<DavTimeout> {
        for word in s.split(',').map(|w| w.trim()) {
            if word.eq_ignore_ascii_case("infinite") {
                return Some(DavTimeout(Duration::ZERO));
            }
            if let Some(caps) = RE_SECOND.captures(word) {
                // all digits, so parsing can only fail on overflow.
                let n = caps[1].parse::<u64>().unwrap_or(u64::MAX);
                let n = n.clamp(1, Self::MAX_SECONDS);
                return Some(DavTimeout(Duration::from_secs(n)));
            }
        }
        None
    }
}

impl Header for DavTimeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        DavTimeout::parse(one(values)?).ok_or_else(invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if self.0.is_zero() {
            encode_str(values, "Infinite");
        } else {
            encode_str(values, format!("Second-{}", self.0.as_secs()));
        }
    }
}

/// Entity tag in an `If-Match`/`If-None-Match` list or an `If:` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    /// The tag without quotes.
    pub value: String,
    pub weak: bool,
    /// Preceded by `Not` (only used in `If:` conditions).
    pub negate: bool,
}

impl EntityTag {
    /// Parse `"value"` or `W/"value"`.
    pub fn parse(s: &str) -> Option<EntityTag> {
        let s = s.trim();
        let (weak, rest) = match s.strip_prefix("W/") {
            Some(r) => (true, r),
            None => (false, s),
        };
        let value = rest.strip_prefix('"')?.strip_suffix('"')?;
        if value.contains('"') {
            return None;
        }
        Some(EntityTag {
            value: value.to_string(),
            weak,
            negate: false,
        })
    }
}

impl Display for EntityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.weak {
            write!(f, "W/")?;
        }
        write!(f, "\"{}\"", self.value)
    }
}

/// Value of `If-Match` / `If-None-Match`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETagList {
    Star,
    Tags(Vec<EntityTag>),
}

impl ETagList {
    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut tags = Vec::new();
        for v in values {
            let s = v.to_str().map_err(|_| invalid())?;
            for word in s.split(',').map(|w| w.trim()).filter(|w| !w.is_empty()) {
                if word == "*" {
                    return Ok(ETagList::Star);
                }
                tags.push(EntityTag::parse(word).ok_or_else(invalid)?);
            }
        }
        if tags.is_empty() {
            return Err(invalid());
        }
        Ok(ETagList::Tags(tags))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        match self {
            ETagList::Star => encode_str(values, "*"),
            ETagList::Tags(t) => {
                let s: Vec<String> = t.iter().map(|t| t.to_string()).collect();
                encode_str(values, s.join(", "));
            }
        }
    }
}

/// `If-Match:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfMatch(pub ETagList);

impl Header for IfMatch {
    fn name() -> &'static HeaderName {
        &IF_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfMatch(ETagList::decode(values)?))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        self.0.encode(values)
    }
}

/// `If-None-Match:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfNoneMatch(pub ETagList);

impl Header for IfNoneMatch {
    fn name() -> &'static HeaderName {
        &IF_NONE_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfNoneMatch(ETagList::decode(values)?))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        self.0.encode(values)
    }
}

/// State token in an `If:` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateToken {
    /// Lock id, `urn:uuid:` stripped.
    pub value: String,
    pub negate: bool,
}

/// One parenthesized list of an `If:` header. All of its tokens and
/// tags must hold for the condition to hold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IfCondition {
    /// Resource tag, `None` for untagged lists (the request resource).
    pub uri: Option<String>,
    pub tokens: Vec<StateToken>,
    pub tags: Vec<EntityTag>,
}

/// Parsed `If:` header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct If(pub Vec<IfCondition>);

// Character scanner over the header value.
struct Scanner<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn skip_ws(&mut self) {
        let rest = &self.s[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    // read up to (not including) `end`, consume `end`.
    fn until(&mut self, end: char) -> Option<&'a str> {
        let rest = &self.s[self.pos..];
        let idx = rest.find(end)?;
        self.pos += idx + end.len_utf8();
        Some(&rest[..idx])
    }

    // case-insensitive keyword, followed by whitespace or a token/tag.
    fn keyword(&mut self, kw: &str) -> bool {
        let rest = &self.s[self.pos..];
        match rest.get(..kw.len()) {
            Some(w) if w.eq_ignore_ascii_case(kw) => {
                let next = rest[kw.len()..].chars().next();
                if matches!(next, Some(c) if c.is_whitespace() || c == '<' || c == '[') {
                    self.pos += kw.len();
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

fn resource_tag(uri: &str) -> String {
    match uri.strip_suffix('/') {
        Some(u) if !u.is_empty() && !u.ends_with('/') => u.to_string(),
        _ => uri.to_string(),
    }
}

impl If {
    /// Parse an `If:` header value. `None` if it is malformed.
    pub fn parse(s: &str) -> Option<If> {
        let mut sc = Scanner { s, pos: 0 };
        let mut conditions = Vec::new();
        let mut current: Option<String> = None;
        let mut tagged_groups = 0;
        loop {
            sc.skip_ws();
            match sc.peek() {
                None => break,
                Some('<') => {
                    // A new resource tag. The previous one must have had a list.
                    if current.is_some() && tagged_groups == 0 {
                        return None;
                    }
                    sc.bump();
                    let uri = sc.until('>')?.trim();
                    if uri.is_empty() || uri.contains('<') {
                        return None;
                    }
                    current = Some(resource_tag(uri));
                    tagged_groups = 0;
                }
                Some('(') => {
                    sc.bump();
                    let mut cond = Self::parse_group(&mut sc)?;
                    cond.uri = current.clone();
                    conditions.push(cond);
                    tagged_groups += 1;
                }
                Some(_) => return None,
            }
        }
        if current.is_some() && tagged_groups == 0 {
            return None;
        }
        Some(If(conditions))
    }

    // inside "( ... )", the opening paren already consumed.
    fn parse_group(sc: &mut Scanner) -> Option<IfCondition> {
        let mut cond = IfCondition::default();
        let mut negate = false;
        loop {
            sc.skip_ws();
            match sc.peek()? {
                ')' => {
                    sc.bump();
                    if negate {
                        return None;
                    }
                    return Some(cond);
                }
                '<' => {
                    sc.bump();
                    let token = sc.until('>')?.trim();
                    if token.is_empty() || token.contains(['<', '(', ')']) {
                        return None;
                    }
                    cond.tokens.push(StateToken {
                        value: crate::ls::token_id(token).to_string(),
                        negate,
                    });
                    negate = false;
                }
                '[' => {
                    sc.bump();
                    let raw = sc.until(']')?;
                    let mut tag = EntityTag::parse(raw)?;
                    tag.negate = negate;
                    cond.tags.push(tag);
                    negate = false;
                }
                'n' | 'N' if !negate && sc.keyword("not") => negate = true,
                _ => return None,
            }
        }
    }

    /// All non-negated state tokens, regardless of resource tag.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .flat_map(|c| c.tokens.iter())
            .filter(|t| !t.negate)
            .map(|t| t.value.as_str())
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        // multiple If: headers are concatenated.
        let mut all = Vec::new();
        for v in values {
            let s = v.to_str().map_err(|_| invalid())?;
            all.extend(If::parse(s).ok_or_else(invalid)?.0);
        }
        Ok(If(all))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let mut s = String::new();
        for c in &self.0 {
            if let Some(uri) = &c.uri {
                s.push_str(&format!("<{uri}> "));
            }
            s.push('(');
            let mut items = Vec::new();
            for t in &c.tokens {
                let not = if t.negate { "Not " } else { "" };
                items.push(format!("{not}<urn:uuid:{}>", t.value));
            }
            for t in &c.tags {
                let not = if t.negate { "Not " } else { "" };
                items.push(format!("{not}[{t}]"));
            }
            s.push_str(&items.join(" "));
            s.push_str(") ");
        }
        encode_str(values, s.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn tok(v: &str, negate: bool) -> StateToken {
        StateToken {
            value: v.to_string(),
            negate,
        }
    }

    #[test]
    fn untagged_token() {
        let h = If::parse("(<urn:uuid:X>)").unwrap();
        assert_eq!(h.0.len(), 1);
        assert_eq!(h.0[0].uri, None);
        assert_eq!(h.0[0].tokens, vec![tok("X", false)]);
        assert!(h.0[0].tags.is_empty());

        let h = If::parse("(Not <urn:uuid:X>)").unwrap();
        assert_eq!(h.0[0].tokens, vec![tok("X", true)]);
        let h = If::parse("(nOt\t<urn:uuid:X>)").unwrap();
        assert_eq!(h.0[0].tokens, vec![tok("X", true)]);
    }

    #[test]
    fn tagged_resource() {
        let h = If::parse("<http://host/specs/> (<urn:uuid:X>)").unwrap();
        assert_eq!(h.0.len(), 1);
        assert_eq!(h.0[0].uri.as_deref(), Some("http://host/specs"));
        assert_eq!(h.0[0].tokens, vec![tok("X", false)]);

        let h = If::parse("</a> (<urn:uuid:1>) (<urn:uuid:2>) </b> ([\"e\"])").unwrap();
        let uris: Vec<_> = h.0.iter().map(|c| c.uri.clone().unwrap()).collect();
        assert_eq!(uris, vec!["/a", "/a", "/b"]);
    }

    #[test]
    fn entity_tags() {
        let h = If::parse("([W/\"etag\"])").unwrap();
        let t = &h.0[0].tags[0];
        assert_eq!(t.value, "etag");
        assert!(t.weak);
        assert!(!t.negate);

        let h = If::parse("(Not [W/\"etag\"])").unwrap();
        assert!(h.0[0].tags[0].negate);

        let h = If::parse("(<urn:uuid:a> [\"b\"] Not <DAV:no-lock>)").unwrap();
        assert_eq!(h.0[0].tokens, vec![tok("a", false), tok("DAV:no-lock", true)]);
        assert_eq!(h.0[0].tags[0].value, "b");
    }

    #[test]
    fn malformed() {
        for bad in [
            "(<urn:uuid:X>",
            "<urn:uuid:X>)",
            "([etag])",
            "([\"etag\")",
            "(Not)",
            "(Not Not <x>)",
            "((<x>))",
            "<http://a/>",
            "</a> </b> (<x>)",
            "garbage",
            "(<>)",
        ] {
            assert!(If::parse(bad).is_none(), "{bad} should not parse");
        }
        assert_eq!(If::parse("").unwrap(), If::default());
        assert_eq!(If::parse("()").unwrap().0.len(), 1);
    }

    #[test]
    fn timeout() {
        assert_eq!(DavTimeout::parse("Infinite"), Some(DavTimeout(Duration::ZERO)));
        assert_eq!(
            DavTimeout::parse("Second-4100000000"),
            Some(DavTimeout(Duration::from_secs(4100000000)))
        );
        assert_eq!(
            DavTimeout::parse("Extended, Second-60"),
            Some(DavTimeout(Duration::from_secs(60)))
        );
        assert_eq!(DavTimeout::parse("Second-0"), Some(DavTimeout(Duration::from_secs(1))));
        assert_eq!(DavTimeout::parse("Minute-3"), None);

        let max = Some(DavTimeout(Duration::from_secs(DavTimeout::MAX_SECONDS)));
        assert_eq!(DavTimeout::parse("Second-18446744073709551615"), max);
        assert_eq!(DavTimeout::parse("Second-99999999999999999999999"), max);
    }

    #[test]
    fn typed_headers() {
        let mut map = HeaderMap::new();
        map.insert("depth", HeaderValue::from_static("Infinity"));
        map.insert("overwrite", HeaderValue::from_static("F"));
        map.insert("destination", HeaderValue::from_static("http://h/dav/x%20y"));
        map.insert("lock-token", HeaderValue::from_static("<urn:uuid:abc>"));
        map.insert("if-none-match", HeaderValue::from_static("\"a\", W/\"b\""));
        map.insert("if-match", HeaderValue::from_static("*"));
        assert_eq!(map.typed_get::<Depth>(), Some(Depth::Infinity));
        assert_eq!(map.typed_get::<Overwrite>(), Some(Overwrite(false)));
        assert_eq!(map.typed_get::<Destination>().unwrap().0, "/dav/x%20y");
        assert_eq!(map.typed_get::<LockToken>().unwrap().0, "urn:uuid:abc");
        assert_eq!(map.typed_get::<IfMatch>(), Some(IfMatch(ETagList::Star)));
        match map.typed_get::<IfNoneMatch>().unwrap().0 {
            ETagList::Tags(t) => {
                assert_eq!(t.len(), 2);
                assert!(t[1].weak);
            }
            ETagList::Star => panic!("expected tags"),
        }

        map.insert("depth", HeaderValue::from_static("2"));
        assert!(map.typed_try_get::<Depth>().is_err());
    }
}
