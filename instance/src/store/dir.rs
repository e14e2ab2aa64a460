//! Directory-backed shared store, one file per key.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::KeyValueStore;

/// A durable key-value store kept in a directory.
///
/// Separate processes pointing at the same directory share state. Each write
/// lands in a temporary file that is renamed over the key, so a reader sees
/// either the old or the new value of a key, never a torn one.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory backing this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if valid {
            Ok(self.root.join(key))
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported key: {:?}", key),
            ))
        }
    }
}

impl KeyValueStore for DirStore {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));

        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
