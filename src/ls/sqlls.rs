//! Locksystem persisted in a SQLite database.
//!
//! Every operation opens its own connection on the blocking thread pool,
//! so there is no shared connection object between concurrent requests.
//! Rows carry the number of path segments in a `depth` column, which turns
//! the "locks on my ancestors" lookup into a range filter.
//!
//! Expired rows are removed by the reaper, started by
//! [`SqlLs::with_reaper`] or [`SqlLs::spawn_reaper`]. Nothing depends on
//! the reaper having run: whether a lock is active is always computed from
//! its timestamps when it is read.
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use http::StatusCode;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use xmltree::Element;

use crate::davheaders::DavTimeout;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::ls::*;
use crate::xmltree_ext::{element_from_bytes, ElementExt};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS dav_locks (
        token        TEXT PRIMARY KEY,
        path         TEXT NOT NULL,
        depth        INTEGER NOT NULL,
        shared       INTEGER NOT NULL,
        recursive    INTEGER NOT NULL,
        owner        TEXT,
        principal    TEXT,
        timeout_secs INTEGER NOT NULL,
        issued_ms    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS dav_locks_depth ON dav_locks (depth);
    CREATE INDEX IF NOT EXISTS dav_locks_path ON dav_locks (path);
";

const COLUMNS: &str =
    "token, path, shared, recursive, owner, principal, timeout_secs, issued_ms";

/// SQLite-backed LockSystem.
#[derive(Debug)]
pub struct SqlLs {
    db: PathBuf,
}

fn db_path(path: &DavPath) -> String {
    let s = path.as_url_string();
    match s.strip_suffix('/') {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => s,
    }
}

fn to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn owner_to_xml(owner: &Option<Element>) -> Option<String> {
    let buf = owner.as_ref()?.to_bytes().ok()?;
    String::from_utf8(buf).ok()
}

fn row_to_lock(row: &Row) -> rusqlite::Result<DavLock> {
    let path: String = row.get(1)?;
    let owner: Option<String> = row.get(4)?;
    let timeout: i64 = row.get(6)?;
    let issued: i64 = row.get(7)?;
    let path = DavPath::new(&path).map_err(|e| {
        let msg = format!("lock path {path:?}: {e}");
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, msg.into())
    })?;
    Ok(DavLock {
        token: row.get(0)?,
        path,
        lock_type: if row.get::<_, bool>(2)? {
            LockType::Shared
        } else {
            LockType::Exclusive
        },
        recursive: row.get(3)?,
        owner: owner.and_then(|o| element_from_bytes(o.as_bytes()).ok()),
        principal: row.get(5)?,
        timeout: Duration::from_secs(timeout.max(0) as u64),
        issued: UNIX_EPOCH + Duration::from_millis(issued.max(0) as u64),
    })
}

// all rows on the ancestor chain of `path` (including itself).
fn ancestor_rows(conn: &Connection, path: &DavPath) -> rusqlite::Result<Vec<DavLock>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM dav_locks WHERE depth <= ?1"
    ))?;
    let rows = stmt.query_map(params![path.depth() as i64], row_to_lock)?;
    rows.collect()
}

// all rows strictly below `path`.
fn descendant_rows(conn: &Connection, path: &DavPath) -> rusqlite::Result<Vec<DavLock>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM dav_locks WHERE depth > ?1"
    ))?;
    let rows = stmt.query_map(params![path.depth() as i64], row_to_lock)?;
    let mut res = Vec::new();
    for lock in rows {
        let lock = lock?;
        if path.is_ancestor_of(&lock.path) {
            res.push(lock);
        }
    }
    Ok(res)
}

fn select_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<DavLock>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM dav_locks WHERE token = ?1"),
        params![token],
        row_to_lock,
    )
    .optional()
}

fn insert(conn: &Connection, lock: &DavLock) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO dav_locks (token, path, depth, shared, recursive, owner, principal, timeout_secs, issued_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            lock.token,
            db_path(&lock.path),
            lock.path.depth() as i64,
            lock.is_shared(),
            lock.recursive,
            owner_to_xml(&lock.owner),
            lock.principal,
            lock.timeout.as_secs().min(DavTimeout::MAX_SECONDS) as i64,
            to_millis(lock.issued),
        ],
    )?;
    Ok(())
}

impl SqlLs {
    /// Open (and if needed initialize) the lock database at `db`.
    pub fn new(db: impl Into<PathBuf>) -> DavResult<Arc<SqlLs>> {
        let ls = SqlLs { db: db.into() };
        let conn = ls.connect()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Arc::new(ls))
    }

    /// Like [`SqlLs::new`], and start a reaper that sweeps expired rows
    /// every `every`. Must be called from within a tokio runtime.
    pub fn with_reaper(db: impl Into<PathBuf>, every: Duration) -> DavResult<Arc<SqlLs>> {
        let ls = SqlLs::new(db)?;
        ls.spawn_reaper(every);
        Ok(ls)
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.db)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    // run `f` with a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> DavResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(db)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            f(&mut conn)
        })
        .await?;
        res.map_err(DavError::from)
    }

    /// Delete all expired rows. Returns the number of rows removed.
    pub async fn reap(&self) -> DavResult<usize> {
        let now = to_millis(SystemTime::now());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM dav_locks
                 WHERE timeout_secs > 0 AND issued_ms + timeout_secs * 1000 < ?1",
                params![now],
            )
        })
        .await
    }

    /// Start a background task that calls [`SqlLs::reap`] every `every`.
    ///
    /// The task stops by itself once the last `Arc<SqlLs>` is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<SqlLs> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(ls) = weak.upgrade() else { break };
                match ls.reap().await {
                    Ok(0) => {}
                    Ok(n) => debug!("sqlls: reaped {n} expired locks"),
                    Err(e) => warn!("sqlls: reaper failed: {e}"),
                }
            }
        })
    }
}

impl DavLockSystem for SqlLs {
    fn lock<'a>(
        &'a self,
        path: &'a DavPath,
        lock_type: LockType,
        owner: Option<&'a Element>,
        principal: Option<&'a str>,
        recursive: bool,
        timeout: Duration,
    ) -> LsFuture<'a, LockResult> {
        let lock = DavLock::new(path, lock_type, owner, principal, recursive, timeout);
        async move {
            let res = self
                .with_conn(move |conn| {
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let now = SystemTime::now();
                    let rows = ancestor_rows(&tx, &lock.path)?;
                    let mut held = locks_for_path(&rows, &lock.path, now);
                    if lock.recursive {
                        held.extend(
                            descendant_rows(&tx, &lock.path)?
                                .into_iter()
                                .filter(|l| l.is_active_at(now)),
                        );
                    }
                    if !compatible(&held, lock.lock_type) {
                        return Ok(Err(StatusCode::LOCKED));
                    }
                    insert(&tx, &lock)?;
                    tx.commit()?;
                    Ok(Ok(lock))
                })
                .await?;
            match &res {
                Ok(l) => debug!("sqlls: lock {} created on {:?}", l.token, l.path),
                Err(_) => debug!("sqlls: lock on {path:?} refused: conflicting lock"),
            }
            Ok(res)
        }
        .boxed()
    }

    fn refresh<'a>(
        &'a self,
        path: &'a DavPath,
        token: &'a str,
        timeout: Duration,
    ) -> LsFuture<'a, LockResult> {
        let path = path.clone();
        let token = token_id(token).to_string();
        async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut lock = match select_token(&tx, &token)? {
                    Some(l) if l.is_active() && l.applies_to(&path) => l,
                    _ => return Ok(Err(StatusCode::PRECONDITION_FAILED)),
                };
                lock.timeout = timeout;
                lock.issued = SystemTime::now();
                tx.execute("DELETE FROM dav_locks WHERE token = ?1", params![token])?;
                insert(&tx, &lock)?;
                tx.commit()?;
                Ok(Ok(lock))
            })
            .await
        }
        .boxed()
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str) -> LsFuture<'a, StatusCode> {
        let path = path.clone();
        let token = token_id(token).to_string();
        async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                match select_token(&tx, &token)? {
                    Some(l) if l.is_active() && l.applies_to(&path) => {
                        tx.execute("DELETE FROM dav_locks WHERE token = ?1", params![token])?;
                        tx.commit()?;
                        Ok(StatusCode::NO_CONTENT)
                    }
                    _ => Ok(StatusCode::CONFLICT),
                }
            })
            .await
        }
        .boxed()
    }

    fn discover<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, Vec<DavLock>> {
        let path = path.clone();
        async move {
            self.with_conn(move |conn| {
                let rows = ancestor_rows(conn, &path)?;
                Ok(locks_for_path(&rows, &path, SystemTime::now()))
            })
            .await
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> LsFuture<'a, ()> {
        let path = path.clone();
        async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut doomed: Vec<String> = descendant_rows(&tx, &path)?
                    .into_iter()
                    .map(|l| l.token)
                    .collect();
                doomed.extend(
                    ancestor_rows(&tx, &path)?
                        .into_iter()
                        .filter(|l| l.path == path)
                        .map(|l| l.token),
                );
                for token in doomed {
                    tx.execute("DELETE FROM dav_locks WHERE token = ?1", params![token])?;
                }
                tx.commit()
            })
            .await
        }
        .boxed()
    }
}
