//! Serve a directory on the local disk.
//!
//! The store holds no state besides the base directory, every call goes
//! straight to the filesystem through `tokio::fs`. Dead properties are not
//! supported, so PROPPATCH answers 403 for everything.

use std::io::SeekFrom;
#[cfg(unix)]
use std::os::unix::{ffi::OsStrExt, fs::MetadataExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_stream::stream;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{future, FutureExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::fs::*;

#[derive(Debug)]
pub struct LocalFs {
    base: PathBuf,
    public: bool,
}

#[derive(Debug)]
struct LocalFile(tokio::fs::File);

struct LocalEntry {
    name: Vec<u8>,
    meta: FsResult<std::fs::Metadata>,
}

impl LocalFs {
    /// Serve `base`.
    ///
    /// With `public` set, created files and directories get mode 644/755,
    /// otherwise 600/700. The umask still applies.
    pub fn new(base: PathBuf, public: bool) -> Arc<LocalFs> {
        Arc::new(LocalFs { base, public })
    }

    fn fspath(&self, path: &DavPath) -> PathBuf {
        self.base.join(path.as_rel_ospath())
    }

    fn file_mode(&self) -> u32 {
        if self.public {
            0o644
        } else {
            0o600
        }
    }

    fn dir_mode(&self) -> u32 {
        self.file_mode() | 0o100 | if self.public { 0o011 } else { 0 }
    }
}

#[cfg(unix)]
fn entry_name(e: &tokio::fs::DirEntry) -> Vec<u8> {
    e.file_name().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn entry_name(e: &tokio::fs::DirEntry) -> Vec<u8> {
    e.file_name().to_string_lossy().as_bytes().to_vec()
}

impl DavFileSystem for LocalFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let meta = tokio::fs::metadata(self.fspath(path)).await?;
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            trace!("localfs: read_dir {path:?}");
            let mut dir = tokio::fs::read_dir(self.fspath(path)).await?;
            let path = path.clone();
            let entries = stream! {
                loop {
                    match dir.next_entry().await {
                        Ok(Some(e)) => {
                            let meta = e.metadata().await.map_err(FsError::from);
                            let entry = LocalEntry { name: entry_name(&e), meta };
                            yield Box::new(entry) as Box<dyn DavDirEntry>;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("localfs: listing {path:?} stopped early: {e}");
                            break;
                        }
                    }
                }
            };
            Ok(Box::pin(entries) as FsStream<Box<dyn DavDirEntry>>)
        }
        .boxed()
    }

    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            trace!("localfs: open {path:?} {options:?}");
            let mut oo = tokio::fs::OpenOptions::new();
            oo.read(options.read)
                .write(options.write)
                .append(options.append)
                .truncate(options.truncate)
                .create(options.create)
                .create_new(options.create_new);
            #[cfg(unix)]
            oo.mode(self.file_mode());
            let file = oo.open(self.fspath(path)).await?;
            Ok(Box::new(LocalFile(file)) as Box<dyn DavFile>)
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("localfs: create_dir {path:?}");
            #[allow(unused_mut)]
            let mut builder = tokio::fs::DirBuilder::new();
            #[cfg(unix)]
            builder.mode(self.dir_mode());
            builder.create(self.fspath(path)).await?;
            Ok(())
        }
        .boxed()
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("localfs: remove_dir {path:?}");
            if path.is_root() {
                return Err(FsError::Forbidden);
            }
            tokio::fs::remove_dir(self.fspath(path)).await?;
            Ok(())
        }
        .boxed()
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("localfs: remove_file {path:?}");
            tokio::fs::remove_file(self.fspath(path)).await?;
            Ok(())
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("localfs: copy {from:?} -> {to:?}");
            let src = self.fspath(from);
            if tokio::fs::metadata(&src).await?.is_dir() {
                return Err(FsError::Forbidden);
            }
            tokio::fs::copy(src, self.fspath(to)).await.map_err(|e| {
                debug!("localfs: copy {from:?} -> {to:?} failed: {e}");
                FsError::from(e)
            })?;
            Ok(())
        }
        .boxed()
    }
}

impl DavDirEntry for LocalEntry {
    fn name(&self) -> Vec<u8> {
        self.name.clone()
    }

    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>> {
        let meta = match &self.meta {
            Ok(m) => Ok(Box::new(m.clone()) as Box<dyn DavMetaData>),
            Err(e) => Err(*e),
        };
        Box::pin(future::ready(meta))
    }
}

impl DavFile for LocalFile {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>> {
        async move {
            let meta = self.0.metadata().await?;
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()> {
        async move {
            self.0.write_all(&buf).await?;
            Ok(())
        }
        .boxed()
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<()> {
        async move {
            while buf.has_remaining() {
                let n = self.0.write(buf.chunk()).await?;
                buf.advance(n);
            }
            Ok(())
        }
        .boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes> {
        async move {
            let mut buf = BytesMut::with_capacity(count);
            while buf.len() < count && self.0.read_buf(&mut buf).await? > 0 {}
            Ok(buf.freeze())
        }
        .boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<u64> {
        async move { Ok(self.0.seek(pos).await?) }.boxed()
    }

    fn flush(&mut self) -> FsFuture<()> {
        async move {
            self.0.flush().await?;
            self.0.sync_all().await?;
            Ok(())
        }
        .boxed()
    }
}

impl DavMetaData for std::fs::Metadata {
    fn len(&self) -> u64 {
        self.len()
    }
    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.created()?)
    }
    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified()?)
    }
    fn is_dir(&self) -> bool {
        self.is_dir()
    }
    fn is_file(&self) -> bool {
        self.is_file()
    }

    // inode, size and mtime in microseconds, like apache does it.
    fn etag(&self) -> Option<String> {
        let mtime = self.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
        let micros = mtime.as_secs() * 1_000_000 + u64::from(mtime.subsec_micros());
        let mut parts = Vec::with_capacity(3);
        #[cfg(unix)]
        parts.push(self.ino());
        if self.is_file() {
            parts.push(self.len());
        }
        parts.push(micros);
        Some(
            parts
                .iter()
                .map(|p| format!("{p:x}"))
                .collect::<Vec<_>>()
                .join("-"),
        )
    }
}
