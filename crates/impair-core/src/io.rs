use crate::error::Result;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Read every `*.yaml` document in `dir` and deserialize it.
///
/// A missing directory yields an empty list.
pub fn read_yaml_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let data = std::fs::read_to_string(&path)?;
        out.push(serde_yaml::from_str(&data)?);
    }
    Ok(out)
}

/// Lock shared by every handle to the record stored at `path`.
///
/// Read-modify-write cycles hold it from the read until the write lands, so
/// two writers in one process never overwrite each other's fields.
pub fn record_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// Acquire a record lock, ignoring poisoning left by a panicked writer.
pub fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run store I/O on the blocking pool from async code.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| std::io::Error::other(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.yaml");
        atomic_write(&path, b"data").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "data");
    }

    #[test]
    fn read_yaml_dir_skips_other_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.yaml"), "1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml: [").unwrap();
        let values: Vec<u32> = read_yaml_dir(dir.path()).unwrap();
        assert_eq!(values, vec![1]);
    }

    #[test]
    fn record_lock_is_shared_per_path() {
        let a = record_lock(Path::new("/tmp/impair-lock-test/a.yaml"));
        let again = record_lock(Path::new("/tmp/impair-lock-test/a.yaml"));
        let b = record_lock(Path::new("/tmp/impair-lock-test/b.yaml"));
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn read_yaml_dir_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let values: Vec<u32> = read_yaml_dir(&dir.path().join("nope")).unwrap();
        assert!(values.is_empty());
    }
}
