use std::time::Duration;

use dav_engine::body::Body;
use dav_engine::davpath::DavPath;
use dav_engine::{DavHandler, DavLockSystem, FileSystem, LockSystem, LockType, MemLs, PropertyTable};
use futures_util::StreamExt;
use http::{HeaderMap, Request, StatusCode};

const LOCK_EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:tester@example.com</D:href></D:owner>
</D:lockinfo>"#;

const LOCK_SHARED: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

struct Resp {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Resp {
    fn header(&self, name: &str) -> String {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    fn lock_token(&self) -> String {
        self.header("lock-token")
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    }
}

fn server() -> DavHandler {
    let _ = env_logger::builder().is_test(true).try_init();
    DavHandler::builder(FileSystem::Mem)
        .locksystem(LockSystem::Mem)
        .build()
}

async fn call(dav: &DavHandler, method: &str, path: &str, hdrs: &[(&str, &str)], body: &str) -> Resp {
    let mut builder = Request::builder().method(method).uri(path);
    for (k, v) in hdrs {
        builder = builder.header(*k, *v);
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    let resp = dav.handle(req).await;
    let (parts, mut body) = resp.into_parts();
    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk.unwrap());
    }
    Resp {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(data).unwrap(),
    }
}

async fn put(dav: &DavHandler, path: &str, data: &str) {
    let r = call(dav, "PUT", path, &[], data).await;
    assert!(r.status.is_success(), "PUT {path}: {}", r.status);
}

async fn mkcol(dav: &DavHandler, path: &str) {
    assert_eq!(call(dav, "MKCOL", path, &[], "").await.status, StatusCode::CREATED);
}

async fn lock(dav: &DavHandler, path: &str, depth: &str, body: &str) -> Resp {
    call(dav, "LOCK", path, &[("depth", depth), ("timeout", "Second-600")], body).await
}

#[tokio::test]
async fn put_get_delete() {
    let dav = server();
    put(&dav, "/hello.txt", "hello world").await;

    let r = call(&dav, "GET", "/hello.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "hello world");
    assert_eq!(r.header("content-type"), "text/plain");
    assert!(r.header("etag").starts_with('"'));

    let r = call(&dav, "HEAD", "/hello.txt", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.is_empty());

    // overwrite.
    let r = call(&dav, "PUT", "/hello.txt", &[], "again").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = call(&dav, "PUT", "/nodir/hello.txt", &[], "x").await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    assert_eq!(call(&dav, "DELETE", "/hello.txt", &[], "").await.status, StatusCode::NO_CONTENT);
    assert_eq!(call(&dav, "GET", "/hello.txt", &[], "").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mkcol_rules() {
    let dav = server();
    mkcol(&dav, "/coll").await;
    assert_eq!(call(&dav, "MKCOL", "/coll", &[], "").await.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(call(&dav, "MKCOL", "/a/b", &[], "").await.status, StatusCode::CONFLICT);
    assert_eq!(
        call(&dav, "MKCOL", "/withbody", &[], "<x/>").await.status,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
}

#[tokio::test]
async fn conditional_get_and_put() {
    let dav = server();
    put(&dav, "/f", "data").await;
    let etag = call(&dav, "GET", "/f", &[], "").await.header("etag");

    let r = call(&dav, "GET", "/f", &[("if-none-match", &etag)], "").await;
    assert_eq!(r.status, StatusCode::NOT_MODIFIED);

    let r = call(&dav, "PUT", "/f", &[("if-none-match", &etag)], "new").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = call(&dav, "PUT", "/f", &[("if-match", "\"stale\"")], "new").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = call(&dav, "PUT", "/f", &[("if-match", &etag)], "new").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    // create-only.
    let r = call(&dav, "PUT", "/g", &[("if-none-match", "*")], "x").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = call(&dav, "PUT", "/g", &[("if-none-match", "*")], "x").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn if_header_with_unknown_token_fails() {
    let dav = server();
    put(&dav, "/f", "data").await;
    let r = call(&dav, "PUT", "/f", &[("if", "(<urn:uuid:00000000-0000-0000-0000-000000000000>)")], "x").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = call(&dav, "PUT", "/f", &[("if", "(<urn:uuid:broken")], "x").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    // negation of a token nobody holds is true.
    let r = call(&dav, "PUT", "/f", &[("if", "(Not <DAV:no-lock>)")], "x").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_put_unlock() {
    let dav = server();
    put(&dav, "/f", "data").await;

    let r = lock(&dav, "/f", "0", LOCK_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.lock_token();
    assert!(token.starts_with("urn:uuid:"));
    assert!(r.body.contains("<D:lockdiscovery>"));
    assert!(r.body.contains("mailto:tester@example.com"));

    // no token: locked.
    let r = call(&dav, "PUT", "/f", &[], "x").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert!(r.body.contains("lock-token-submitted"));
    assert!(r.body.contains("<D:href>/f</D:href>"));

    let if_hdr = format!("(<{token}>)");
    let r = call(&dav, "PUT", "/f", &[("if", &if_hdr)], "x").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    // refresh.
    let r = call(&dav, "LOCK", "/f", &[("if", &if_hdr), ("timeout", "Second-100")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains(&token));

    let lt = format!("<{token}>");
    assert_eq!(call(&dav, "UNLOCK", "/f", &[("lock-token", &lt)], "").await.status, StatusCode::NO_CONTENT);
    assert_eq!(call(&dav, "UNLOCK", "/f", &[("lock-token", &lt)], "").await.status, StatusCode::CONFLICT);
    assert_eq!(call(&dav, "UNLOCK", "/f", &[], "").await.status, StatusCode::BAD_REQUEST);

    assert_eq!(call(&dav, "PUT", "/f", &[], "y").await.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn shared_and_exclusive() {
    let dav = server();
    put(&dav, "/f", "data").await;
    assert_eq!(lock(&dav, "/f", "0", LOCK_SHARED).await.status, StatusCode::OK);
    assert_eq!(lock(&dav, "/f", "0", LOCK_SHARED).await.status, StatusCode::OK);
    assert_eq!(lock(&dav, "/f", "0", LOCK_EXCLUSIVE).await.status, StatusCode::LOCKED);

    put(&dav, "/g", "data").await;
    assert_eq!(lock(&dav, "/g", "0", LOCK_EXCLUSIVE).await.status, StatusCode::OK);
    assert_eq!(lock(&dav, "/g", "0", LOCK_SHARED).await.status, StatusCode::LOCKED);
}

#[tokio::test]
async fn lock_unmapped_creates_resource() {
    let dav = server();
    let r = lock(&dav, "/new", "0", LOCK_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = call(&dav, "GET", "/new", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.is_empty());

    assert_eq!(lock(&dav, "/nodir/new", "0", LOCK_EXCLUSIVE).await.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn recursive_lock_covers_members() {
    let dav = server();
    mkcol(&dav, "/coll").await;
    let r = lock(&dav, "/coll", "infinity", LOCK_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.lock_token();

    assert_eq!(call(&dav, "PUT", "/coll/new", &[], "x").await.status, StatusCode::LOCKED);
    assert_eq!(lock(&dav, "/coll/new", "0", LOCK_SHARED).await.status, StatusCode::LOCKED);

    // tagged with the lock root.
    let if_hdr = format!("</coll> (<{token}>)");
    let r = call(&dav, "PUT", "/coll/new", &[("if", &if_hdr)], "x").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = call(&dav, "PROPFIND", "/coll/new", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains(&token));
    assert!(r.body.contains("<D:lockroot>"));
}

#[tokio::test]
async fn delete_skips_locked_member() {
    let dav = server();
    mkcol(&dav, "/coll").await;
    put(&dav, "/coll/a", "a").await;
    put(&dav, "/coll/b", "b").await;
    put(&dav, "/coll/c", "c").await;
    assert_eq!(lock(&dav, "/coll/b", "0", LOCK_EXCLUSIVE).await.status, StatusCode::OK);

    let r = call(&dav, "DELETE", "/coll", &[], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.body.matches("<D:response>").count(), 1);
    assert!(r.body.contains("<D:href>/coll/b</D:href>"));
    assert!(r.body.contains("HTTP/1.1 423 Locked"));
    assert!(!r.body.contains("<D:href>/coll/</D:href>"));

    assert_eq!(call(&dav, "GET", "/coll/a", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(call(&dav, "GET", "/coll/b", &[], "").await.status, StatusCode::OK);
    assert_eq!(call(&dav, "GET", "/coll/c", &[], "").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_locked_target_is_plain_423() {
    let dav = server();
    put(&dav, "/f", "x").await;
    assert_eq!(lock(&dav, "/f", "0", LOCK_EXCLUSIVE).await.status, StatusCode::OK);
    let r = call(&dav, "DELETE", "/f", &[], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert!(r.body.contains("lock-token-submitted"));
}

#[tokio::test]
async fn copy_rules() {
    let dav = server();
    mkcol(&dav, "/src").await;
    put(&dav, "/src/x", "x").await;
    put(&dav, "/other", "o").await;

    let dest = [("destination", "http://localhost/dst"), ("depth", "1")];
    assert_eq!(call(&dav, "COPY", "/src", &dest, "").await.status, StatusCode::BAD_REQUEST);
    assert_eq!(call(&dav, "COPY", "/src", &[], "").await.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        call(&dav, "COPY", "/src", &[("destination", "/src")], "").await.status,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        call(&dav, "COPY", "/src", &[("destination", "/src/sub")], "").await.status,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        call(&dav, "COPY", "/src", &[("destination", "/no/dst")], "").await.status,
        StatusCode::CONFLICT
    );

    let r = call(&dav, "COPY", "/src", &[("destination", "http://localhost/dst")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(call(&dav, "GET", "/dst/x", &[], "").await.body, "x");
    assert_eq!(call(&dav, "GET", "/src/x", &[], "").await.status, StatusCode::OK);

    let ow = [("destination", "/other"), ("overwrite", "F")];
    assert_eq!(call(&dav, "COPY", "/src/x", &ow, "").await.status, StatusCode::PRECONDITION_FAILED);
    let r = call(&dav, "COPY", "/src/x", &[("destination", "/other")], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(call(&dav, "GET", "/other", &[], "").await.body, "x");
}

#[tokio::test]
async fn copy_into_locked_destination() {
    let dav = server();
    put(&dav, "/a", "a").await;
    put(&dav, "/b", "b").await;
    assert_eq!(lock(&dav, "/b", "0", LOCK_EXCLUSIVE).await.status, StatusCode::OK);
    let r = call(&dav, "COPY", "/a", &[("destination", "/b")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);
    assert_eq!(call(&dav, "GET", "/b", &[], "").await.body, "b");
}

#[tokio::test]
async fn move_tree() {
    let dav = server();
    mkcol(&dav, "/src").await;
    mkcol(&dav, "/src/sub").await;
    put(&dav, "/src/sub/x", "x").await;

    let r = call(&dav, "MOVE", "/src", &[("destination", "http://localhost/dst"), ("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = call(&dav, "MOVE", "/src", &[("destination", "http://localhost/dst")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(call(&dav, "GET", "/dst/sub/x", &[], "").await.body, "x");
    assert_eq!(call(&dav, "PROPFIND", "/src", &[("depth", "0")], "").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_keeps_locked_member() {
    let dav = server();
    mkcol(&dav, "/src").await;
    put(&dav, "/src/a", "a").await;
    put(&dav, "/src/b", "b").await;
    assert_eq!(lock(&dav, "/src/b", "0", LOCK_EXCLUSIVE).await.status, StatusCode::OK);

    let r = call(&dav, "MOVE", "/src", &[("destination", "/dst")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:href>/src/b</D:href>"));
    // a moved, b and the source collection stayed.
    assert_eq!(call(&dav, "GET", "/dst/a", &[], "").await.status, StatusCode::OK);
    assert_eq!(call(&dav, "GET", "/src/a", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(call(&dav, "GET", "/src/b", &[], "").await.status, StatusCode::OK);
}

#[tokio::test]
async fn propfind_and_proppatch() {
    let dav = server();
    mkcol(&dav, "/coll").await;
    put(&dav, "/coll/one.txt", "1").await;
    put(&dav, "/coll/two.txt", "22").await;

    let r = call(&dav, "PROPFIND", "/coll", &[("depth", "1")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.body.matches("<D:response>").count(), 3);
    assert!(r.body.contains("<D:collection />") || r.body.contains("<D:collection/>"));
    assert!(r.body.contains("<D:getcontentlength>2</D:getcontentlength>"));

    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:example:z">
  <D:set><D:prop><Z:color>red</Z:color></D:prop></D:set>
</D:propertyupdate>"#;
    let r = call(&dav, "PROPPATCH", "/coll/one.txt", &[], patch).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("HTTP/1.1 200 OK"));

    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:Z="urn:example:z">
  <D:prop><Z:color/><Z:size/><D:getetag/></D:prop>
</D:propfind>"#;
    let r = call(&dav, "PROPFIND", "/coll/one.txt", &[("depth", "0")], find).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains(">red<"));
    assert!(r.body.contains("HTTP/1.1 404 Not Found"));
    assert!(r.body.contains("<D:getetag>"));

    // live properties are protected, and then nothing is applied.
    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:example:z">
  <D:set><D:prop><D:getetag>x</D:getetag><Z:shape>round</Z:shape></D:prop></D:set>
</D:propertyupdate>"#;
    let r = call(&dav, "PROPPATCH", "/coll/one.txt", &[], patch).await;
    assert!(r.body.contains("HTTP/1.1 403 Forbidden"));
    assert!(r.body.contains("HTTP/1.1 424 Failed Dependency"));

    // dead properties travel with COPY.
    let r = call(&dav, "COPY", "/coll/one.txt", &[("destination", "/copy.txt")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = call(&dav, "PROPFIND", "/copy.txt", &[("depth", "0")], find).await;
    assert!(r.body.contains(">red<"));
    assert!(!r.body.contains(">round<"));
}

#[tokio::test]
async fn options_and_methods() {
    let dav = server();
    put(&dav, "/f", "x").await;
    let r = call(&dav, "OPTIONS", "/f", &[], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("dav"), "1,2");
    assert!(r.header("allow").contains("PROPFIND"));
    assert!(r.header("allow").contains("LOCK"));

    let r = call(&dav, "PATCH", "/f", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn strip_prefix() {
    let dav = DavHandler::builder(FileSystem::Mem)
        .strip_prefix("/dav")
        .locksystem(LockSystem::Mem)
        .build();
    put(&dav, "/dav/f", "x").await;
    assert_eq!(call(&dav, "GET", "/dav/f", &[], "").await.body, "x");
    assert_eq!(call(&dav, "GET", "/f", &[], "").await.status, StatusCode::NOT_FOUND);

    let r = call(&dav, "PROPFIND", "/dav/", &[("depth", "1")], "").await;
    assert!(r.body.contains("<D:href>/dav/f</D:href>"));
}

#[tokio::test]
async fn huge_lock_timeout_is_clamped() {
    let dav = server();
    put(&dav, "/f", "x").await;
    let hdrs = [("timeout", "Second-18446744073709551615")];
    let r = call(&dav, "LOCK", "/f", &hdrs, LOCK_EXCLUSIVE).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("Second-42949672"));

    assert_eq!(call(&dav, "PUT", "/f", &[], "y").await.status, StatusCode::LOCKED);
    let r = call(&dav, "PROPFIND", "/f", &[("depth", "0")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(lock(&dav, "/f", "0", LOCK_EXCLUSIVE).await.status, StatusCode::LOCKED);
}

#[tokio::test]
async fn star_preconditions_without_etags() {
    let dav = DavHandler::builder(FileSystem::Mem)
        .locksystem(LockSystem::Mem)
        .properties(PropertyTable::new(vec![], vec![]))
        .build();
    put(&dav, "/f", "one").await;

    let r = call(&dav, "PUT", "/f", &[("if-match", "*")], "two").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = call(&dav, "PUT", "/f", &[("if-none-match", "*")], "three").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(call(&dav, "GET", "/f", &[], "").await.body, "two");

    let r = call(&dav, "PUT", "/g", &[("if-none-match", "*")], "new").await;
    assert_eq!(r.status, StatusCode::CREATED);
}

#[tokio::test]
async fn ranged_get() {
    let dav = server();
    put(&dav, "/r.txt", "0123456789").await;

    let r = call(&dav, "GET", "/r.txt", &[("range", "bytes=2-5")], "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.body, "2345");
    assert_eq!(r.header("content-range"), "bytes 2-5/10");
    assert_eq!(r.header("content-length"), "4");

    let r = call(&dav, "GET", "/r.txt", &[("range", "bytes=-3")], "").await;
    assert_eq!(r.body, "789");

    let r = call(&dav, "GET", "/r.txt", &[("range", "bytes=20-")], "").await;
    assert_eq!(r.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(r.header("content-range"), "bytes */10");

    // several ranges get the whole thing.
    let r = call(&dav, "GET", "/r.txt", &[("range", "bytes=0-1,4-5")], "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "0123456789");

    let r = call(&dav, "GET", "/r.txt", &[], "").await;
    assert_eq!(r.header("accept-ranges"), "bytes");
    let etag = r.header("etag");
    let hdrs = [("range", "bytes=0-0"), ("if-range", etag.as_str())];
    let r = call(&dav, "GET", "/r.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.body, "0");
    let hdrs = [("range", "bytes=0-0"), ("if-range", "\"stale\"")];
    let r = call(&dav, "GET", "/r.txt", &hdrs, "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "0123456789");
}

#[tokio::test]
async fn copy_continues_past_locked_member() {
    let _ = env_logger::builder().is_test(true).try_init();
    let ls = MemLs::new();
    let dav = DavHandler::builder(FileSystem::Mem)
        .locksystem(LockSystem::Custom(ls.clone()))
        .build();
    mkcol(&dav, "/src").await;
    put(&dav, "/src/a", "a").await;
    mkcol(&dav, "/src/sub").await;
    put(&dav, "/src/sub/x", "x").await;
    put(&dav, "/src/z", "z").await;

    // a lock on a destination path that does not exist yet.
    let sub = DavPath::new("/dst/sub").unwrap();
    ls.lock(&sub, LockType::Exclusive, None, None, true, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    let r = call(&dav, "COPY", "/src", &[("destination", "/dst")], "").await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert_eq!(r.body.matches("<D:response>").count(), 1);
    assert!(r.body.contains("<D:href>/dst/sub/</D:href>"));
    assert!(r.body.contains("HTTP/1.1 423 Locked"));

    assert_eq!(call(&dav, "GET", "/dst/a", &[], "").await.body, "a");
    assert_eq!(call(&dav, "GET", "/dst/z", &[], "").await.body, "z");
    assert_eq!(call(&dav, "GET", "/dst/sub/x", &[], "").await.status, StatusCode::NOT_FOUND);
    assert_eq!(call(&dav, "GET", "/src/sub/x", &[], "").await.status, StatusCode::OK);
}
