//! Durable registry of launched labs.
//!
//! The registry is a single JSON document keyed by generated lab
//! identifier. It is the only place those identifiers live: losing an
//! entry orphans the running topology, recoverable only by inspecting the
//! external tool by name. The orchestrator is the sole writer; a mutex
//! serializes the read-modify-write cycles within this process.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// One launched topology.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LabRecord {
    /// Topology name used by the external tool; status and destroy
    /// queries key off it.
    pub name: String,
    /// Local definition file used for deploy. Destroy requires this exact
    /// file, so the record keeps the resolved path.
    pub original_file: Utf8PathBuf,
    /// Status noted at write time. Authoritative status comes from
    /// re-querying the external tool, not this field.
    pub status: String,
    /// When the lab was launched.
    pub created_at: DateTime<Utc>,
    /// Fully parsed topology definition, retained for display and
    /// debugging.
    pub config: serde_json::Value,
}

/// Errors raised by registry operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when the registry document cannot be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the registry document cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Generates a short collision-negligible lab identifier.
#[must_use]
pub fn generate_lab_id() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

/// File-backed lab registry.
#[derive(Debug)]
pub struct LabRegistry {
    path: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl LabRegistry {
    /// Creates a registry backed by the given document path. The file is
    /// created on first write.
    #[must_use]
    pub const fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::const_new(()),
        }
    }

    /// Inserts a record under `lab_id` and rewrites the document.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the document cannot be read or
    /// written.
    pub async fn insert(&self, lab_id: &str, record: LabRecord) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = read_entries(&self.path)?;
        entries.insert(lab_id.to_owned(), record);
        write_entries(&self.path, &entries)
    }

    /// Removes and returns the record under `lab_id`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the document cannot be read or
    /// written.
    pub async fn remove(&self, lab_id: &str) -> Result<Option<LabRecord>, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = read_entries(&self.path)?;
        let removed = entries.remove(lab_id);
        if removed.is_some() {
            write_entries(&self.path, &entries)?;
        }
        Ok(removed)
    }

    /// Returns the record under `lab_id`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the document cannot be read.
    pub async fn get(&self, lab_id: &str) -> Result<Option<LabRecord>, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = read_entries(&self.path)?;
        Ok(entries.remove(lab_id))
    }

    /// Returns all records keyed by lab identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the document cannot be read.
    pub async fn entries(&self) -> Result<BTreeMap<String, LabRecord>, RegistryError> {
        let _guard = self.write_lock.lock().await;
        read_entries(&self.path)
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), RegistryError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| RegistryError::Io {
        path: path.to_path_buf(),
        message: String::from("registry path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn read_entries(path: &Utf8Path) -> Result<BTreeMap<String, LabRecord>, RegistryError> {
    let (parent, file_name) = split_path(path)?;

    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(RegistryError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    let exists = dir.try_exists(file_name).map_err(|err| RegistryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    if !exists {
        return Ok(BTreeMap::new());
    }

    let contents = dir
        .read_to_string(file_name)
        .map_err(|err| RegistryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    serde_json::from_str(&contents).map_err(|err| RegistryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn write_entries(
    path: &Utf8Path,
    entries: &BTreeMap<String, LabRecord>,
) -> Result<(), RegistryError> {
    let (parent, file_name) = split_path(path)?;

    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| RegistryError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| RegistryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered = serde_json::to_string_pretty(entries).map_err(|err| RegistryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    dir.write(file_name, rendered).map_err(|err| RegistryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
