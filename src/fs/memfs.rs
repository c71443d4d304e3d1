//! Simple in-memory filesystem.
//!
//! Nodes live in one ordered map keyed by path segments, so directory
//! listings come out sorted. Supports dead properties.
use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use futures_util::{future, stream, FutureExt};
use http::StatusCode;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::fs::*;

type Key = Vec<String>;
type Tree = BTreeMap<Key, MemNode>;

/// Ephemeral in-memory filesystem.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug, Clone)]
struct MemNode {
    data: Option<Vec<u8>>, // None for a collection
    props: HashMap<String, DavProp>,
    mtime: SystemTime,
    crtime: SystemTime,
}

#[derive(Debug, Clone)]
struct MemMeta {
    size: u64,
    mtime: SystemTime,
    crtime: SystemTime,
    is_dir: bool,
}

#[derive(Debug)]
struct MemFile {
    tree: Arc<Mutex<Tree>>,
    key: Key,
    pos: usize,
}

struct MemEntry {
    name: Vec<u8>,
    meta: MemMeta,
}

fn key(path: &DavPath) -> Key {
    path.segments().to_vec()
}

fn prop_key(p: &DavProp) -> String {
    format!("{}{}", p.namespace.as_deref().unwrap_or(""), p.name)
}

impl MemNode {
    fn new(data: Option<Vec<u8>>) -> MemNode {
        let now = SystemTime::now();
        MemNode {
            data,
            props: HashMap::new(),
            mtime: now,
            crtime: now,
        }
    }

    fn meta(&self) -> MemMeta {
        MemMeta {
            size: self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0),
            mtime: self.mtime,
            crtime: self.crtime,
            is_dir: self.data.is_none(),
        }
    }
}

impl MemFs {
    /// Create a new, empty, filesystem. It only contains the root collection.
    pub fn new() -> Arc<MemFs> {
        let mut tree = Tree::new();
        tree.insert(Vec::new(), MemNode::new(None));
        Arc::new(MemFs {
            tree: Arc::new(Mutex::new(tree)),
        })
    }

    fn parent_is_dir(tree: &Tree, path: &DavPath) -> bool {
        match path.parent() {
            Some(p) => matches!(tree.get(&key(&p)), Some(n) if n.data.is_none()),
            None => false,
        }
    }

    fn has_children(tree: &Tree, k: &Key) -> bool {
        tree.keys()
            .any(|c| c.len() == k.len() + 1 && c.starts_with(k))
    }
}

impl DavFileSystem for MemFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        let tree = self.tree.lock();
        let res = match tree.get(&key(path)) {
            Some(node) => Ok(Box::new(node.meta()) as Box<dyn DavMetaData>),
            None => Err(FsError::NotFound),
        };
        Box::pin(future::ready(res))
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        trace!("FS: read_dir {path:?}");
        let tree = self.tree.lock();
        let k = key(path);
        let res = match tree.get(&k) {
            Some(node) if node.data.is_none() => {
                let entries: Vec<Box<dyn DavDirEntry>> = tree
                    .iter()
                    .filter(|(c, _)| c.len() == k.len() + 1 && c.starts_with(&k))
                    .map(|(c, n)| {
                        Box::new(MemEntry {
                            name: c[k.len()].as_bytes().to_vec(),
                            meta: n.meta(),
                        }) as Box<dyn DavDirEntry>
                    })
                    .collect();
                Ok(Box::pin(stream::iter(entries)) as FsStream<Box<dyn DavDirEntry>>)
            }
            Some(_) => Err(FsError::Forbidden),
            None => Err(FsError::NotFound),
        };
        Box::pin(future::ready(res))
    }

    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        trace!("FS: open {path:?}");
        let mut tree = self.tree.lock();
        let k = key(path);
        let res = match tree.get_mut(&k) {
            Some(node) if node.data.is_none() => Err(FsError::Forbidden),
            Some(_) if options.create_new => Err(FsError::Exists),
            Some(node) => {
                if options.truncate {
                    node.data = Some(Vec::new());
                    node.mtime = SystemTime::now();
                }
                Ok(())
            }
            None if !options.create && !options.create_new => Err(FsError::NotFound),
            None => {
                if Self::parent_is_dir(&tree, path) {
                    tree.insert(k.clone(), MemNode::new(Some(Vec::new())));
                    Ok(())
                } else {
                    Err(FsError::NotFound)
                }
            }
        };
        let res = res.map(|_| {
            let pos = if options.append {
                tree.get(&k)
                    .and_then(|n| n.data.as_ref().map(|d| d.len()))
                    .unwrap_or(0)
            } else {
                0
            };
            Box::new(MemFile {
                tree: self.tree.clone(),
                key: k,
                pos,
            }) as Box<dyn DavFile>
        });
        Box::pin(future::ready(res))
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: create_dir {path:?}");
        let mut tree = self.tree.lock();
        let k = key(path);
        let res = if tree.contains_key(&k) {
            Err(FsError::Exists)
        } else if !Self::parent_is_dir(&tree, path) {
            Err(FsError::NotFound)
        } else {
            tree.insert(k, MemNode::new(None));
            Ok(())
        };
        Box::pin(future::ready(res))
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: remove_dir {path:?}");
        let mut tree = self.tree.lock();
        let k = key(path);
        let res = match tree.get(&k) {
            None => Err(FsError::NotFound),
            Some(n) if n.data.is_some() => Err(FsError::Forbidden),
            Some(_) if k.is_empty() => Err(FsError::Forbidden),
            Some(_) if Self::has_children(&tree, &k) => Err(FsError::NotEmpty),
            Some(_) => {
                tree.remove(&k);
                Ok(())
            }
        };
        Box::pin(future::ready(res))
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: remove_file {path:?}");
        let mut tree = self.tree.lock();
        let k = key(path);
        let res = match tree.get(&k) {
            None => Err(FsError::NotFound),
            Some(n) if n.data.is_none() => Err(FsError::Forbidden),
            Some(_) => {
                tree.remove(&k);
                Ok(())
            }
        };
        Box::pin(future::ready(res))
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("FS: copy {from:?} {to:?}");
        let mut tree = self.tree.lock();
        let res = match tree.get(&key(from)) {
            None => Err(FsError::NotFound),
            Some(n) if n.data.is_none() => Err(FsError::Forbidden),
            Some(_) if !Self::parent_is_dir(&tree, to) => Err(FsError::NotFound),
            Some(n) => {
                let node = MemNode::new(n.data.clone());
                tree.insert(key(to), node);
                Ok(())
            }
        };
        Box::pin(future::ready(res))
    }

    fn have_props<'a>(&'a self, _path: &'a DavPath) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(future::ready(true))
    }

    fn patch_props<'a>(
        &'a self,
        path: &'a DavPath,
        patch: Vec<(bool, DavProp)>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        let mut tree = self.tree.lock();
        let res = match tree.get_mut(&key(path)) {
            None => Err(FsError::NotFound),
            Some(node) => {
                let mut res = Vec::new();
                for (set, p) in patch {
                    let k = prop_key(&p);
                    if set {
                        node.props.insert(k, p.clone());
                    } else {
                        node.props.remove(&k);
                    }
                    let p = DavProp { xml: None, ..p };
                    res.push((StatusCode::OK, p));
                }
                Ok(res)
            }
        };
        Box::pin(future::ready(res))
    }

    fn get_props<'a>(&'a self, path: &'a DavPath, do_content: bool) -> FsFuture<'a, Vec<DavProp>> {
        let tree = self.tree.lock();
        let res = match tree.get(&key(path)) {
            None => Err(FsError::NotFound),
            Some(node) => {
                let mut props: Vec<DavProp> = node
                    .props
                    .values()
                    .map(|p| DavProp {
                        xml: if do_content { p.xml.clone() } else { None },
                        ..p.clone()
                    })
                    .collect();
                props.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(props)
            }
        };
        Box::pin(future::ready(res))
    }
}

impl DavDirEntry for MemEntry {
    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>> {
        Box::pin(future::ready(Ok(Box::new(self.meta.clone()) as Box<dyn DavMetaData>)))
    }

    fn name(&self) -> Vec<u8> {
        self.name.clone()
    }
}

impl DavFile for MemFile {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>> {
        let tree = self.tree.lock();
        let res = match tree.get(&self.key) {
            Some(n) => Ok(Box::new(n.meta()) as Box<dyn DavMetaData>),
            None => Err(FsError::NotFound),
        };
        Box::pin(future::ready(res))
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<()> {
        let mut v = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            let chunk = buf.chunk();
            v.extend_from_slice(chunk);
            let l = chunk.len();
            buf.advance(l);
        }
        self.write_bytes(Bytes::from(v))
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()> {
        let mut tree = self.tree.lock();
        let res = match tree.get_mut(&self.key).and_then(|n| {
            n.mtime = SystemTime::now();
            n.data.as_mut()
        }) {
            Some(data) => {
                let end = self.pos + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[self.pos..end].copy_from_slice(&buf);
                self.pos = end;
                Ok(())
            }
            None => Err(FsError::NotFound),
        };
        Box::pin(future::ready(res))
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes> {
        let tree = self.tree.lock();
        let res = match tree.get(&self.key).and_then(|n| n.data.as_ref()) {
            Some(data) => {
                let start = self.pos.min(data.len());
                let end = (self.pos + count).min(data.len());
                self.pos = end;
                Ok(Bytes::copy_from_slice(&data[start..end]))
            }
            None => Err(FsError::NotFound),
        };
        Box::pin(future::ready(res))
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<u64> {
        let len = {
            let tree = self.tree.lock();
            tree.get(&self.key)
                .and_then(|n| n.data.as_ref().map(|d| d.len()))
                .unwrap_or(0) as i64
        };
        let newpos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(d) => len + d,
            SeekFrom::Current(d) => self.pos as i64 + d,
        };
        if newpos < 0 {
            return Box::pin(future::ready(Err(FsError::GeneralFailure)));
        }
        self.pos = newpos as usize;
        Box::pin(future::ready(Ok(newpos as u64)))
    }

    fn flush(&mut self) -> FsFuture<()> {
        future::ready(Ok(())).boxed()
    }
}

impl DavMetaData for MemMeta {
    fn len(&self) -> u64 {
        self.size
    }
    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.mtime)
    }
    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.crtime)
    }
    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn tree_operations() {
        let fs = MemFs::new();
        fs.create_dir(&p("/d")).await.unwrap();
        assert_eq!(fs.create_dir(&p("/x/y")).await.unwrap_err(), FsError::NotFound);

        let mut f = fs.open(&p("/d/f"), OpenOptions::write()).await.unwrap();
        f.write_bytes(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(fs.metadata(&p("/d/f")).await.unwrap().len(), 5);

        fs.copy(&p("/d/f"), &p("/d/g")).await.unwrap();
        let names: Vec<Vec<u8>> = fs
            .read_dir(&p("/d"))
            .await
            .unwrap()
            .map(|e| e.name())
            .collect()
            .await;
        assert_eq!(names, vec![b"f".to_vec(), b"g".to_vec()]);

        assert_eq!(fs.remove_dir(&p("/d")).await.unwrap_err(), FsError::NotEmpty);
        fs.remove_file(&p("/d/f")).await.unwrap();
        fs.remove_file(&p("/d/g")).await.unwrap();
        fs.remove_dir(&p("/d")).await.unwrap();
        assert!(fs.metadata(&p("/d")).await.is_err());
    }
}
