//! ==============================================================================
//! managed.rs - managed configuration document
//! ==============================================================================
//!
//! purpose:
//!     reads the administrator-pushed configuration document and extracts the
//!     identity fields this agent reports.
//!
//! format:
//!     a json object; the dictionary we care about lives under a namespace key
//!     (default "managed_configuration"):
//!
//!         {
//!             "managed_configuration": {
//!                 "SERIAL_NUMBER": "C02XK1",
//!                 "email": "jane@example.com",
//!                 "firstName": "Jane Doe"
//!             }
//!         }
//!
//!     a missing file, a missing key and an empty dictionary all read as the
//!     same thing: every field empty.
//!
//! relationships:
//!     - used by: sources.rs (ManagedConfigWatcher)
//!     - used by: domain.rs (ManagedConfig inside ConfigurationChanged)
//!
//! ==============================================================================

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_NAMESPACE_KEY: &str = "managed_configuration";

const SERIAL_NUMBER_KEY: &str = "SERIAL_NUMBER";
const EMAIL_KEY: &str = "email";
const FULL_NAME_KEY: &str = "firstName";

/// identity fields supplied by managed configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedConfig {
    pub serial_number: String,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Error)]
pub enum ManagedConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ManagedConfig {
    /// extract the recognized keys from a dictionary
    ///
    /// values that are absent or not strings resolve to empty.
    pub fn from_dictionary(dictionary: &Map<String, Value>) -> Self {
        let string = |key: &str| {
            dictionary
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            serial_number: string(SERIAL_NUMBER_KEY),
            email: string(EMAIL_KEY),
            full_name: string(FULL_NAME_KEY),
        }
    }

    /// look up the namespace key in a parsed document
    pub fn from_document(document: &Value, namespace_key: &str) -> Self {
        match document.get(namespace_key).and_then(Value::as_object) {
            Some(dictionary) => Self::from_dictionary(dictionary),
            None => Self::default(),
        }
    }

    /// read the document at `path`
    ///
    /// a file that does not exist is an empty configuration. a file that exists
    /// but cannot be read or parsed is an error, so a half-written update never
    /// wipes the current values.
    pub fn read_from(path: &Path, namespace_key: &str) -> Result<Self, ManagedConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ManagedConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let document: Value =
            serde_json::from_str(&content).map_err(|source| ManagedConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::from_document(&document, namespace_key))
    }
}
