//! Key/value blob storage for student assets.
//!
//! Keys are flat strings that use `/` as a path-like separator, so prefix
//! listing can walk "folders". Backends: a local directory tree and an
//! in-memory map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Object storage addressed by `/`-separated keys.
///
/// Exact-key `put`/`get`/`delete` are strongly consistent. `list` may lag
/// behind recent writes on remote backends.
pub trait BlobStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    /// Every key starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
    fn delete(&mut self, key: &str) -> Result<(), BlobError>;
}

/// Reject keys that could escape the store root or that have empty segments.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let bad_segment = |s: &str| s.is_empty() || s == "." || s == ".." || s.contains('\\');
    if key.is_empty() || key.split('/').any(bad_segment) {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Configuration for [`LocalBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBlobConfig {
    /// Directory that key paths are resolved against.
    pub root: PathBuf,
}

/// Blob store backed by a directory tree: key `a/b/c.jpg` is file
/// `{root}/a/b/c.jpg`. Directories left empty by a delete are removed.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (creating if needed) the store root.
    pub fn open(config: &LocalBlobConfig) -> Result<Self, BlobError> {
        fs::create_dir_all(&config.root).map_err(|source| BlobError::Io {
            key: String::new(),
            source,
        })?;
        Ok(Self {
            root: config.root.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    /// Remove now-empty directories from `dir` upwards, stopping at the root.
    fn prune_empty_dirs(&self, mut dir: &Path) {
        while dir != self.root && dir.starts_with(&self.root) {
            if fs::remove_dir(dir).is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
        Some(segments?.join("/"))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        let io_err = |source: io::Error| BlobError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, bytes).map_err(io_err)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
            _ => BlobError::Io {
                key: key.to_string(),
                source,
            },
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        // Walk only the deepest directory named by the prefix.
        let start = match prefix.rfind('/') {
            Some(idx) if validate_key(&prefix[..idx]).is_ok() => self.path_for(&prefix[..idx])?,
            Some(_) => return Ok(Vec::new()),
            None => self.root.clone(),
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&start) {
            let entry = entry.map_err(|e| BlobError::Io {
                key: prefix.to_string(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.key_for(entry.path()) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 blob path"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&mut self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        fs::remove_file(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
            _ => BlobError::Io {
                key: key.to_string(),
                source,
            },
        })?;
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent);
        }
        Ok(())
    }
}

/// Blob store held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBlobStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        validate_key(key)?;
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        Ok(self
            .blobs
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&mut self, key: &str) -> Result<(), BlobError> {
        self.blobs
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rollcall-blob-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn local(tag: &str) -> LocalBlobStore {
        LocalBlobStore::open(&LocalBlobConfig { root: scratch_dir(tag) }).unwrap()
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("student_images/10A/E1_Jane/E1_Jane_1.jpg").is_ok());
        for bad in ["", "/abs", "a//b", "a/../b", "./a", "a/", "a\\b"] {
            assert!(matches!(validate_key(bad), Err(BlobError::InvalidKey(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_memory_put_get_delete() {
        let mut store = MemoryBlobStore::new();
        store.put("a/b.jpg", b"x").unwrap();
        assert_eq!(store.get("a/b.jpg").unwrap(), b"x");
        store.delete("a/b.jpg").unwrap();
        assert!(matches!(store.get("a/b.jpg"), Err(BlobError::NotFound(_))));
        assert!(matches!(store.delete("a/b.jpg"), Err(BlobError::NotFound(_))));
    }

    #[test]
    fn test_memory_list_prefix() {
        let mut store = MemoryBlobStore::new();
        for key in ["r/10A/E1_A/1.jpg", "r/10A/E1_A/2.jpg", "r/10A/E10_B/1.jpg", "r/10B/E2_C/1.jpg"] {
            store.put(key, b"").unwrap();
        }
        assert_eq!(store.list("r/10A/E1_A/").unwrap(), vec!["r/10A/E1_A/1.jpg", "r/10A/E1_A/2.jpg"]);
        assert_eq!(store.list("r/10A/").unwrap().len(), 3);
        assert_eq!(store.list("").unwrap().len(), 4);
        assert!(store.list("r/11").unwrap().is_empty());
    }

    #[test]
    fn test_local_roundtrip() {
        let mut store = local("roundtrip");
        store.put("student_images/10A/E1_Jane/E1_Jane_1.jpg", b"jpeg").unwrap();
        assert!(store.root().join("student_images/10A/E1_Jane/E1_Jane_1.jpg").is_file());
        assert_eq!(store.get("student_images/10A/E1_Jane/E1_Jane_1.jpg").unwrap(), b"jpeg");
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn test_local_list_prefix() {
        let mut store = local("list");
        for key in ["s/10A/E1_A/E1_A_1.jpg", "s/10A/E1_A/E1_A_2.jpg", "s/10A/E12_B/E12_B_1.jpg", "s/9C/E3_C/E3_C_1.jpg"] {
            store.put(key, b"").unwrap();
        }

        assert_eq!(
            store.list("s/10A/E1_A/").unwrap(),
            vec!["s/10A/E1_A/E1_A_1.jpg", "s/10A/E1_A/E1_A_2.jpg"]
        );
        // Prefix that ends mid-segment still matches by string
        assert_eq!(store.list("s/10A/E1").unwrap().len(), 3);
        assert_eq!(store.list("s/").unwrap().len(), 4);
        assert!(store.list("s/missing/").unwrap().is_empty());
        assert!(store.list("../etc/").unwrap().is_empty());

        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn test_local_delete_prunes_empty_folders() {
        let mut store = local("prune");
        store.put("s/10A/E1_A/E1_A_1.jpg", b"").unwrap();
        store.put("s/10A/E2_B/E2_B_1.jpg", b"").unwrap();

        store.delete("s/10A/E1_A/E1_A_1.jpg").unwrap();
        assert!(!store.root().join("s/10A/E1_A").exists());
        assert!(store.root().join("s/10A/E2_B").exists());

        store.delete("s/10A/E2_B/E2_B_1.jpg").unwrap();
        assert!(!store.root().join("s").exists());
        assert!(store.root().exists());

        assert!(matches!(store.delete("s/10A/E2_B/E2_B_1.jpg"), Err(BlobError::NotFound(_))));
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn test_local_rejects_escape() {
        let mut store = local("escape");
        assert!(matches!(store.put("../outside.jpg", b""), Err(BlobError::InvalidKey(_))));
        let _ = fs::remove_dir_all(store.root());
    }
}
