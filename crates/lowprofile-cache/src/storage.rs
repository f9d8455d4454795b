//! Disk cache implementation
//!
//! Layout: one flat namespace directory under the cache root, one file per
//! key. The file name is the key's hex digest and the contents are the raw
//! fetched bytes, with no header or manifest.
//!
//! Entries are write-once. A write lands in a private temporary file first
//! and is then hard-linked into place, which fails if the entry already
//! exists; two writers racing on the same key therefore waste work but can
//! never replace or tear each other's entry.
//!
//! On filesystems without hard links the entry is created exclusively and
//! written in place. Readers may see a partial entry while that write is in
//! progress, and a write that fails removes what it left behind.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Default namespace directory name
pub const DEFAULT_NAMESPACE: &str = "cache-perf";

/// Write-once, content-addressed byte store
#[derive(Debug)]
pub struct DiskCache {
    /// Namespace directory holding the entries
    dir: PathBuf,

    /// Keys currently being written by this process
    writing: Mutex<HashSet<CacheKey>>,

    /// Suffix source for temporary file names
    tmp_seq: AtomicU64,
}

impl DiskCache {
    /// Open or create the cache namespace `namespace` under `root`
    ///
    /// # Arguments
    /// * `root` - Directory that contains cache namespaces
    /// * `namespace` - Single path component naming this cache
    ///
    /// # Returns
    /// * `Result<DiskCache>` - Cache handle
    pub fn open<P: AsRef<Path>>(root: P, namespace: &str) -> Result<Self> {
        if namespace.is_empty()
            || namespace == "."
            || namespace == ".."
            || namespace.contains(['/', '\\'])
        {
            return Err(Error::InvalidNamespace(namespace.to_string()));
        }

        let dir = root.as_ref().join(namespace);
        fs::create_dir_all(&dir).map_err(|source| Error::Namespace {
            path: dir.clone(),
            source,
        })?;
        debug!("Opened disk cache at {:?}", dir);

        Ok(DiskCache {
            dir,
            writing: Mutex::new(HashSet::new()),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Read an entry. Missing entries and storage failures both come back
    /// as `None`, so the caller simply treats them as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.try_get(key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cache read for {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Read an entry, surfacing storage failures
    pub fn try_get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => {
                trace!("Read:{}", key);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Store an entry unless one already exists.
    ///
    /// Returns `true` only when this call created the entry. Storage
    /// failures are logged and reported as `false`.
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> bool {
        match self.try_put(key, bytes) {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!("Cache write for {} failed: {}", key, e);
                false
            }
        }
    }

    /// Store an entry unless one already exists, surfacing storage failures
    pub fn try_put(&self, key: &CacheKey, bytes: &[u8]) -> Result<bool> {
        let path = self.path_for(key);
        if path.exists() {
            return Ok(false);
        }

        let Some(_guard) = WriteGuard::acquire(&self.writing, key) else {
            // Another thread of this process is writing the same entry
            return Ok(false);
        };

        // The namespace may have been removed underneath us
        fs::create_dir_all(&self.dir)?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.{}.tmp", key, std::process::id(), seq));

        let result = write_file(&tmp_path, bytes).and_then(|()| publish(&tmp_path, &path, bytes));
        let _ = fs::remove_file(&tmp_path);

        let inserted = result?;
        if inserted {
            trace!("Write:{} ({} bytes)", key, bytes.len());
        }
        Ok(inserted)
    }

    /// Check whether an entry exists
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// List the keys of all entries in the namespace
    pub fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(key) = CacheKey::parse(name) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Number of entries in the namespace (0 if it cannot be listed)
    pub fn len(&self) -> usize {
        self.keys().map(|keys| keys.len()).unwrap_or(0)
    }

    /// Check if the namespace holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// File path backing `key`
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    /// The namespace directory
    pub fn namespace_dir(&self) -> &Path {
        &self.dir
    }
}

/// Marks a key as being written by this process for the guard's lifetime
struct WriteGuard<'a> {
    writing: &'a Mutex<HashSet<CacheKey>>,
    key: CacheKey,
}

impl<'a> WriteGuard<'a> {
    fn acquire(writing: &'a Mutex<HashSet<CacheKey>>, key: &CacheKey) -> Option<Self> {
        if !writing.lock().insert(key.clone()) {
            return None;
        }
        Some(WriteGuard {
            writing,
            key: key.clone(),
        })
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.writing.lock().remove(&self.key);
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Move a fully written temporary file into place without replacing an
/// existing entry. Returns `false` if the entry already existed.
fn publish(tmp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<bool> {
    match fs::hard_link(tmp_path, path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            // Filesystems without hard links: fall back to exclusive create
            debug!("hard_link unavailable ({}), writing entry in place", e);
            create_entry(path, |file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
        }
    }
}

/// Exclusively create `path` and fill it. Returns `false` if the entry
/// already existed. A failed fill removes the partial entry so that a later
/// write can still create it.
fn create_entry<F>(path: &Path, fill: F) -> io::Result<bool>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    if let Err(e) = fill(&mut file) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(true)
}
