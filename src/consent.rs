//! ==============================================================================
//! consent.rs - persisted terms-of-service acceptance
//! ==============================================================================
//!
//! purpose:
//!     a single boolean, read once at startup and written when the user accepts
//!     the terms from the dashboard. it decides whether the dashboard shows the
//!     terms notice; reporting runs either way.
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode consent: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConsentFile {
    terms_accepted: bool,
}

#[derive(Debug)]
pub struct ConsentStore {
    path: PathBuf,
    accepted: bool,
}

impl ConsentStore {
    /// read the flag; an absent or unreadable file means not accepted
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let accepted = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ConsentFile>(&content) {
                Ok(file) => file.terms_accepted,
                Err(e) => {
                    warn!("ignoring unreadable consent file {}: {}", path.display(), e);
                    false
                }
            },
            Err(_) => false,
        };
        Self { path, accepted }
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// record acceptance; accepting twice is a no-op
    pub fn accept(&mut self) -> Result<(), ConsentError> {
        if self.accepted {
            return Ok(());
        }

        let write_error = |source| ConsentError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_error)?;
        }
        let content = serde_json::to_string(&ConsentFile {
            terms_accepted: true,
        })?;
        std::fs::write(&self.path, content).map_err(write_error)?;

        self.accepted = true;
        Ok(())
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!ConsentStore::load(dir.path().join("consent.json")).accepted());
    }

    #[test]
    fn test_accept_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("consent.json");

        let mut store = ConsentStore::load(&path);
        store.accept().unwrap();
        assert!(store.accepted());
        store.accept().unwrap();

        assert!(ConsentStore::load(&path).accepted());
    }

    #[test]
    fn test_corrupt_file_is_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consent.json");
        std::fs::write(&path, "yes").unwrap();
        assert!(!ConsentStore::load(&path).accepted());
    }
}
