//
//  Sample server.
//
//  Listens on localhost:4918, plain http.
//  Connect to http://localhost:4918/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
#[cfg(feature = "sqlls")]
use std::time::Duration;

use clap::Parser;
use futures_util::future::TryFutureExt;
use headers::{authorization::Basic, Authorization, HeaderMapExt};

use dav_engine::{body::Body, DavHandler, FileSystem, LockSystem, NonceCache};

const SESSION_COOKIE: &str = "dav-session";

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
    sessions: Arc<NonceCache>,
}

impl Server {
    fn handle_unauthorized() -> hyper::Response<Body> {
        let mut resp = hyper::Response::new(Body::from("please authenticate"));
        *resp.status_mut() = hyper::StatusCode::UNAUTHORIZED;
        resp.headers_mut().insert(
            "www-authenticate",
            hyper::header::HeaderValue::from_static("Basic realm=\"dav\""),
        );
        resp
    }

    // user of a session cookie we handed out earlier.
    fn session_user(&self, req: &hyper::Request<hyper::Body>) -> Option<String> {
        let cookie = req.headers().typed_get::<headers::Cookie>()?;
        let (nonce, user) = cookie.get(SESSION_COOKIE)?.split_once(':')?;
        self.sessions.validate_for(user, nonce).then(|| user.to_string())
    }

    async fn handle(&self, req: hyper::Request<hyper::Body>) -> Result<hyper::Response<Body>, Infallible> {
        if !self.auth {
            return Ok(self.dh.handle(req).await);
        }
        // the user name becomes the principal of any lock taken.
        if let Some(user) = self.session_user(&req) {
            return Ok(self.dh.handle_with(req, None, Some(user)).await);
        }
        // any password is accepted, this is a demo.
        let user = match req.headers().typed_get::<Authorization<Basic>>() {
            Some(Authorization(basic)) => basic.username().to_string(),
            None => return Ok(Self::handle_unauthorized()),
        };
        let nonce = self.sessions.issue_for(&user);
        let mut resp = self.dh.handle_with(req, None, Some(user.clone())).await;
        let cookie = format!("{SESSION_COOKIE}={nonce}:{user}; Path=/; HttpOnly");
        if let Ok(v) = hyper::header::HeaderValue::from_str(&cookie) {
            resp.headers_mut().insert(hyper::header::SET_COOKIE, v);
        }
        Ok(resp)
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve, instead of an in-memory store
    #[arg(short, long)]
    dir: Option<String>,
    /// keep locks in this SQLite database
    #[cfg(feature = "sqlls")]
    #[arg(short, long)]
    sqlite: Option<String>,
    /// serve below this path
    #[arg(long, default_value = "")]
    prefix: String,
    /// html index on GET of a collection
    #[arg(short = 'i', long)]
    autoindex: bool,
    /// require basic authentication
    #[arg(short, long)]
    auth: bool,
}

#[cfg(feature = "sqlls")]
fn locksystem(cli: &Cli) -> Result<LockSystem, Box<dyn Error>> {
    match &cli.sqlite {
        Some(db) => {
            let ls = dav_engine::SqlLs::with_reaper(db.as_str(), Duration::from_secs(60))?;
            Ok(LockSystem::Custom(ls))
        }
        None => Ok(LockSystem::Mem),
    }
}

#[cfg(not(feature = "sqlls"))]
fn locksystem(_cli: &Cli) -> Result<LockSystem, Box<dyn Error>> {
    Ok(LockSystem::Mem)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let (fs, name) = match &cli.dir {
        Some(dir) => (FileSystem::local(dir, true), dir.as_str()),
        None => (FileSystem::Mem, "memory store"),
    };
    let dh = DavHandler::builder(fs)
        .strip_prefix(cli.prefix.as_str())
        .locksystem(locksystem(&cli)?)
        .autoindex(cli.autoindex)
        .build();
    let dav_server = Server {
        dh,
        auth: cli.auth,
        sessions: Arc::new(NonceCache::default()),
    };

    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { dav_server.handle(req).await }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {e}"));

    println!("Serving {name} on {addr}");
    let _ = server.await;
    Ok(())
}
