//! Local document cache.
//!
//! One blob per key: the anonymous cache and one cache per signed-in
//! identity. Blob layout (QDOC):
//!
//! ```text
//! [magic "QDOC"][version u8][crc32 u32 LE][bincode Vec<Document>]
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::document::Document;

const MAGIC: &[u8; 4] = b"QDOC";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Anonymous,
    Identity(String),
    /// Copies of an identity's documents the remote has not acknowledged.
    Outbox(String),
}

impl CacheKey {
    pub fn for_owner(owner_id: Option<&str>) -> Self {
        match owner_id {
            Some(id) => Self::Identity(id.to_string()),
            None => Self::Anonymous,
        }
    }

    /// File name for this key. Identity ids are hex-encoded so any id is a
    /// safe path component.
    pub fn file_name(&self) -> String {
        match self {
            Self::Anonymous => "anonymous.qdoc".to_string(),
            Self::Identity(id) => hex_name("user-", id),
            Self::Outbox(id) => hex_name("outbox-", id),
        }
    }
}

fn hex_name(prefix: &str, id: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + 5 + id.len() * 2);
    name.push_str(prefix);
    for b in id.as_bytes() {
        let _ = write!(name, "{b:02x}");
    }
    name.push_str(".qdoc");
    name
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt cache blob: {0}")]
    Corrupt(String),
    #[error("cache lock poisoned")]
    Poisoned,
}

pub trait LocalCache: Send {
    /// Documents stored under `key`; empty when nothing was stored.
    fn load(&self, key: &CacheKey) -> Result<Vec<Document>, CacheError>;
    /// Replace everything stored under `key`.
    fn store(&self, key: &CacheKey, docs: &[Document]) -> Result<(), CacheError>;
    fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;
}

pub fn encode_blob(docs: &[Document]) -> Result<Vec<u8>, CacheError> {
    let body = bincode::serialize(docs).map_err(|e| CacheError::Corrupt(e.to_string()))?;
    let crc = crc32fast::hash(&body);
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub fn decode_blob(bytes: &[u8]) -> Result<Vec<Document>, CacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::Corrupt("too short".into()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(CacheError::Corrupt("bad magic".into()));
    }
    if bytes[4] != VERSION {
        return Err(CacheError::Corrupt(format!("unsupported version {}", bytes[4])));
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[5..9]);
    let body = &bytes[HEADER_LEN..];
    if crc32fast::hash(body) != u32::from_le_bytes(crc) {
        return Err(CacheError::Corrupt("checksum mismatch".into()));
    }
    bincode::deserialize(body).map_err(|e| CacheError::Corrupt(e.to_string()))
}

/// Blobs under a directory, one file per key.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl LocalCache for FileCache {
    fn load(&self, key: &CacheKey) -> Result<Vec<Document>, CacheError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => decode_blob(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write: write to .tmp then rename.
    fn store(&self, key: &CacheKey, docs: &[Document]) -> Result<(), CacheError> {
        let bytes = encode_blob(docs)?;
        let path = self.path(key);
        let tmp = path.with_extension("tmp");
        fs::create_dir_all(&self.dir)?;
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(file = %path.display(), count = docs.len(), "cache stored");
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: LocalCache + Sync> LocalCache for Arc<T> {
    fn load(&self, key: &CacheKey) -> Result<Vec<Document>, CacheError> {
        (**self).load(key)
    }

    fn store(&self, key: &CacheKey, docs: &[Document]) -> Result<(), CacheError> {
        (**self).store(key, docs)
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        (**self).remove(key)
    }
}

/// In-memory cache. Writes can be made to fail to exercise save errors.
#[derive(Default)]
pub struct MemoryCache {
    blobs: Mutex<HashMap<CacheKey, Vec<Document>>>,
    fail_writes: Mutex<bool>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut f) = self.fail_writes.lock() {
            *f = fail;
        }
    }

    fn check_writable(&self) -> Result<(), CacheError> {
        let fail = *self.fail_writes.lock().map_err(|_| CacheError::Poisoned)?;
        if fail {
            return Err(CacheError::Io(io::Error::other("write refused")));
        }
        Ok(())
    }
}

impl LocalCache for MemoryCache {
    fn load(&self, key: &CacheKey) -> Result<Vec<Document>, CacheError> {
        let blobs = self.blobs.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(blobs.get(key).cloned().unwrap_or_default())
    }

    fn store(&self, key: &CacheKey, docs: &[Document]) -> Result<(), CacheError> {
        self.check_writable()?;
        let mut blobs = self.blobs.lock().map_err(|_| CacheError::Poisoned)?;
        blobs.insert(key.clone(), docs.to_vec());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.check_writable()?;
        let mut blobs = self.blobs.lock().map_err(|_| CacheError::Poisoned)?;
        blobs.remove(key);
        Ok(())
    }
}
