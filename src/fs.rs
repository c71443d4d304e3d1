//! Contains the structs and traits that define a filesystem backend.
//!
//! The handler only talks to storage through [`DavFileSystem`]. Dead
//! properties are optional: a backend that supports them returns `true`
//! from `have_props` and implements `get_props`/`patch_props`.
use std::fmt::Debug;
use std::future::Future;
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use futures_util::{future, Stream};
use http::StatusCode;

use crate::davpath::DavPath;

#[cfg(any(docsrs, feature = "localfs"))]
pub(crate) mod localfs;
#[cfg(any(docsrs, feature = "memfs"))]
pub(crate) mod memfs;

/// Errors generated by a filesystem implementation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsError {
    NotImplemented,
    GeneralFailure,
    Exists,
    NotFound,
    Forbidden,
    InsufficientStorage,
    NotEmpty,
    IsRemote,
}

impl std::error::Error for FsError {}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&std::io::Error> for FsError {
    fn from(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        if let Some(errno) = e.raw_os_error() {
            #[cfg(any(docsrs, feature = "localfs"))]
            match errno {
                libc::ENOSPC | libc::EDQUOT => return FsError::InsufficientStorage,
                libc::ENOTEMPTY => return FsError::NotEmpty,
                libc::ENOTDIR | libc::ENOENT => return FsError::NotFound,
                _ => {}
            }
            #[cfg(not(any(docsrs, feature = "localfs")))]
            let _ = errno;
        }
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        (&e).into()
    }
}

/// Result type for filesystem calls.
pub type FsResult<T> = std::result::Result<T, FsError>;
/// Future returned by almost all of the DavFileSystem methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;
/// Stream of directory entries.
pub type FsStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A dead property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavProp {
    /// Element name.
    pub name: String,
    /// Namespace prefix used when the property was set.
    pub prefix: Option<String>,
    /// Namespace URI.
    pub namespace: Option<String>,
    /// Serialized XML of the element (None for propname / remove).
    pub xml: Option<Vec<u8>>,
}

/// Options for `open`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
}

impl OpenOptions {
    pub fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            ..Default::default()
        }
    }

    pub fn write() -> OpenOptions {
        OpenOptions {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }
}

/// The trait that defines a filesystem.
pub trait DavFileSystem: Debug + Send + Sync {
    /// Stat a file or directory.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// List the entries of a directory.
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>>;

    /// Open a file.
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions)
        -> FsFuture<'a, Box<dyn DavFile>>;

    /// Create a directory. The parent must exist.
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Remove an empty directory.
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Remove a file.
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Copy a single file. Dead properties are copied by the caller.
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;

    /// Does this filesystem support dead properties.
    fn have_props<'a>(&'a self, _path: &'a DavPath) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(future::ready(false))
    }

    /// Apply a set of property changes as one unit. `true` entries are
    /// set, `false` entries removed. Returns a status per property.
    fn patch_props<'a>(
        &'a self,
        _path: &'a DavPath,
        _patch: Vec<(bool, DavProp)>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        notimplemented_fut!("patch_props")
    }

    /// List all dead properties. With `do_content` false only the names.
    fn get_props<'a>(&'a self, _path: &'a DavPath, _do_content: bool) -> FsFuture<'a, Vec<DavProp>> {
        notimplemented_fut!("get_props")
    }
}

/// One directory entry (or child node).
pub trait DavDirEntry: Send + Sync {
    /// Name of the entry.
    fn name(&self) -> Vec<u8>;

    /// Metadata of the entry.
    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>>;
}

/// A `DavFile` is the equivalent of `std::fs::File`.
pub trait DavFile: Debug + Send + Sync {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>>;
    fn write_buf(&mut self, buf: Box<dyn Buf + Send>) -> FsFuture<()>;
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()>;
    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes>;
    fn seek(&mut self, pos: SeekFrom) -> FsFuture<u64>;
    fn flush(&mut self) -> FsFuture<()>;
}

/// Not much more than type, length, and some timestamps.
pub trait DavMetaData: Debug + Send + Sync {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    /// Simplistic implementation of etag(). Unquoted.
    fn etag(&self) -> Option<String> {
        if let Ok(t) = self.modified() {
            if let Ok(t) = t.duration_since(std::time::UNIX_EPOCH) {
                let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
                let tag = if self.is_file() && self.len() > 0 {
                    format!("{:x}-{:x}", self.len(), t)
                } else {
                    format!("{t:x}")
                };
                return Some(tag);
            }
        }
        None
    }

    fn is_file(&self) -> bool {
        !self.is_dir()
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
}
