//! Key/value storage for approvals and other governance documents.
//!
//! Keys are relative, `/`-separated paths such as
//! `approvals/sha256_<hex>/pm-alice-1767225600-3f2a9c1d.json`. Writes are create-only:
//! storing identical bytes under an existing key succeeds, storing different
//! bytes fails with [`RepositoryError::AlreadyExists`]. A signed approval is
//! never silently replaced.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("key already exists with different content: {key}")]
    AlreadyExists { key: String },

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("repository lock poisoned")]
    Poisoned,
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

pub trait Repository: Send + Sync {
    /// Create `key` with `data`. Idempotent for identical bytes.
    fn store(&self, key: &str, data: &[u8]) -> RepositoryResult<()>;

    fn load(&self, key: &str) -> RepositoryResult<Vec<u8>>;

    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> RepositoryResult<Vec<String>>;
}

impl<R: Repository + ?Sized> Repository for &R {
    fn store(&self, key: &str, data: &[u8]) -> RepositoryResult<()> {
        (**self).store(key, data)
    }
    fn load(&self, key: &str) -> RepositoryResult<Vec<u8>> {
        (**self).load(key)
    }
    fn list(&self, prefix: &str) -> RepositoryResult<Vec<String>> {
        (**self).list(prefix)
    }
}

pub(crate) fn validate_key(key: &str) -> RepositoryResult<()> {
    let invalid = |reason: &str| RepositoryError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("empty"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("must be a relative '/'-separated path"));
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if segment.starts_with('.') {
            return Err(invalid("segments may not start with '.'"));
        }
        if segment.chars().any(char::is_control) {
            return Err(invalid("control characters"));
        }
    }
    Ok(())
}

/// Files under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> RepositoryResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, s| p.join(s)))
    }

    fn walk(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // temp files from in-flight writes
            if name.starts_with('.') {
                continue;
            }
            let key = if rel.is_empty() {
                name.to_string()
            } else {
                format!("{rel}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &key, out)?;
            } else if file_type.is_file() {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl Repository for FsRepository {
    fn store(&self, key: &str, data: &[u8]) -> RepositoryResult<()> {
        let path = self.path_for(key)?;
        let io = |source| RepositoryError::Io {
            key: key.to_string(),
            source,
        };
        match std::fs::read(&path) {
            Ok(existing) if existing == data => return Ok(()),
            Ok(_) => {
                return Err(RepositoryError::AlreadyExists {
                    key: key.to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io(e)),
        }

        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(io)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io)?;
        tmp.write_all(data)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(io)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                RepositoryError::AlreadyExists {
                    key: key.to_string(),
                }
            } else {
                io(e.error)
            }
        })?;
        tracing::debug!(key, bytes = data.len(), "stored");
        Ok(())
    }

    fn load(&self, key: &str) -> RepositoryResult<Vec<u8>> {
        let path = self.path_for(key)?;
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RepositoryError::NotFound {
                    key: key.to_string(),
                }
            } else {
                RepositoryError::Io {
                    key: key.to_string(),
                    source: e,
                }
            }
        })
    }

    fn list(&self, prefix: &str) -> RepositoryResult<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.walk(&self.root, "", &mut keys)
                .map_err(|source| RepositoryError::Io {
                    key: prefix.to_string(),
                    source,
                })?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

/// In-memory repository for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn store(&self, key: &str, data: &[u8]) -> RepositoryResult<()> {
        validate_key(key)?;
        let mut entries = self.entries.write().map_err(|_| RepositoryError::Poisoned)?;
        match entries.get(key) {
            Some(existing) if existing.as_slice() == data => Ok(()),
            Some(_) => Err(RepositoryError::AlreadyExists {
                key: key.to_string(),
            }),
            None => {
                entries.insert(key.to_string(), data.to_vec());
                Ok(())
            }
        }
    }

    fn load(&self, key: &str) -> RepositoryResult<Vec<u8>> {
        validate_key(key)?;
        let entries = self.entries.read().map_err(|_| RepositoryError::Poisoned)?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                key: key.to_string(),
            })
    }

    fn list(&self, prefix: &str) -> RepositoryResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(repo: &dyn Repository) {
        repo.store("approvals/d1/pm.json", b"one").unwrap();
        repo.store("approvals/d1/pm.json", b"one").unwrap();
        let err = repo.store("approvals/d1/pm.json", b"two").unwrap_err();
        assert!(err.is_already_exists());

        repo.store("approvals/d2/qa.json", b"x").unwrap();
        repo.store("other/k", b"y").unwrap();

        assert_eq!(repo.load("approvals/d1/pm.json").unwrap(), b"one");
        assert!(repo.load("approvals/none").unwrap_err().is_not_found());
        assert_eq!(
            repo.list("approvals/").unwrap(),
            vec!["approvals/d1/pm.json", "approvals/d2/qa.json"]
        );
        assert_eq!(repo.list("").unwrap().len(), 3);
    }

    #[test]
    fn memory_repository() {
        exercise(&MemoryRepository::new());
    }

    #[test]
    fn fs_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new(dir.path().join("store"));
        assert!(repo.list("").unwrap().is_empty());
        exercise(&repo);
        assert!(dir.path().join("store/approvals/d1/pm.json").is_file());
    }

    #[test]
    fn hostile_keys_are_rejected() {
        let repo = MemoryRepository::new();
        for key in ["", "/abs", "a//b", "../up", "a/../b", "a\\b", "a/.hidden"] {
            let err = repo.store(key, b"x").unwrap_err();
            assert!(
                matches!(err, RepositoryError::InvalidKey { .. }),
                "accepted {key:?}"
            );
        }
    }
}
