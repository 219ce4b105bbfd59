use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ExitError, Result};

/// Tracks which journals under one directory are open. Each journal can be
/// held by a single store at a time; the lease releases it on drop.
#[derive(Clone, Debug)]
pub struct JournalRegistry {
    dir: PathBuf,
    open: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug)]
pub struct JournalLease {
    name: String,
    path: PathBuf,
    open: Arc<Mutex<HashSet<String>>>,
}

impl JournalRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            open: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn acquire(&self, name: &str) -> Result<JournalLease> {
        let mut open = self.open.lock();
        if !open.insert(name.to_string()) {
            return Err(ExitError::StoreUnavailable(format!(
                "journal {name} is already open in {}",
                self.dir.display()
            )));
        }
        Ok(JournalLease {
            name: name.to_string(),
            path: self.dir.join(format!("{name}.log")),
            open: Arc::clone(&self.open),
        })
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.lock().contains(name)
    }
}

impl JournalLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JournalLease {
    fn drop(&mut self) {
        self.open.lock().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let reg = JournalRegistry::new(dir.path().join("db")).unwrap();

        let lease = reg.acquire("progress").unwrap();
        assert_eq!(lease.path(), dir.path().join("db").join("progress.log"));
        assert!(matches!(
            reg.acquire("progress"),
            Err(ExitError::StoreUnavailable(_))
        ));
        // clones share the same bookkeeping
        assert!(reg.clone().is_open("progress"));

        drop(lease);
        assert!(!reg.is_open("progress"));
        reg.acquire("progress").unwrap();
    }
}
