//! Topology definition parsing and reference resolution.
//!
//! A lab reference is either a local file path or an HTTP(S) URL. URLs are
//! downloaded into a managed scratch directory because the deploy tool
//! only operates on local file paths. Parsing is strict: an empty body, a
//! syntax error, or a non-mapping top level all fail before any external
//! tool is touched.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

/// Suffixes stripped, most specific first, when deriving a lab name from a
/// file name.
const NAME_SUFFIXES: [&str; 4] = [".clab.yml", ".clab.yaml", ".yml", ".yaml"];

const FALLBACK_DOWNLOAD_NAME: &str = "downloaded.clab.yml";

/// Node table of a topology definition.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TopologySection {
    /// Emulated devices keyed by node name.
    #[serde(default)]
    pub nodes: BTreeMap<String, serde_yaml::Value>,
}

/// The subset of a topology definition the orchestrator reads.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TopologyDefinition {
    /// Explicit topology name, when the definition carries one.
    #[serde(default)]
    pub name: Option<String>,
    /// Node table.
    #[serde(default)]
    pub topology: TopologySection,
}

impl TopologyDefinition {
    /// Returns how many nodes the definition declares.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.topology.nodes.len()
    }
}

/// A parsed definition alongside its full content for persistence.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedTopology {
    /// Typed view used for name derivation and node counting.
    pub definition: TopologyDefinition,
    /// Complete definition content, retained for display and debugging.
    pub raw: serde_json::Value,
}

/// Errors raised while resolving or parsing a topology reference.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TopologyError {
    /// Raised when a local reference does not exist.
    #[error("Lab file not found: {path}")]
    NotFound {
        /// Path that was requested.
        path: Utf8PathBuf,
    },
    /// Raised when a URL reference cannot be fetched.
    #[error("failed to download {url}: {message}")]
    Download {
        /// URL that was requested.
        url: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the definition body is empty.
    #[error("topology definition is empty")]
    Empty,
    /// Raised when the definition cannot be parsed.
    #[error("failed to parse topology definition: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
    /// Raised when the top level of the definition is not a mapping.
    #[error("topology definition must be a mapping at the top level")]
    InvalidStructure,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Parses raw definition text.
///
/// # Errors
///
/// Returns [`TopologyError`] when the body is empty, fails to parse, or is
/// not a mapping at the top level.
pub fn parse_topology(text: &str) -> Result<ParsedTopology, TopologyError> {
    if text.trim().is_empty() {
        return Err(TopologyError::Empty);
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|err| TopologyError::Parse {
            message: err.to_string(),
        })?;
    if !value.is_mapping() {
        return Err(TopologyError::InvalidStructure);
    }

    let definition: TopologyDefinition =
        serde_yaml::from_value(value.clone()).map_err(|err| TopologyError::Parse {
            message: err.to_string(),
        })?;
    let raw = serde_json::to_value(&value).map_err(|err| TopologyError::Parse {
        message: err.to_string(),
    })?;

    Ok(ParsedTopology { definition, raw })
}

/// Derives the lab name the deploy tool will use: the definition's explicit
/// name when present, otherwise the file name with its conventional suffix
/// stripped. Status and destroy queries key off this value, so it must be
/// stable for the lab's lifetime.
#[must_use]
pub fn derive_lab_name(definition: &TopologyDefinition, file_name: &str) -> String {
    if let Some(name) = definition.name.as_deref() {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
    }

    for suffix in NAME_SUFFIXES {
        if let Some(stem) = file_name.strip_suffix(suffix) {
            return stem.to_owned();
        }
    }
    file_name.to_owned()
}

/// Counts the node entries inside a persisted definition value.
#[must_use]
pub fn node_count_from_config(config: &serde_json::Value) -> usize {
    config
        .get("topology")
        .and_then(|section| section.get("nodes"))
        .and_then(serde_json::Value::as_object)
        .map_or(0, serde_json::Map::len)
}

/// A resolved reference: a local file the deploy tool can act on.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTopology {
    /// Local path handed to the deploy tool.
    pub path: Utf8PathBuf,
    /// Base file name, used for name derivation and remote staging.
    pub file_name: String,
    /// Parsed definition content.
    pub parsed: ParsedTopology,
}

/// Resolves lab references into parsed local files.
#[derive(Clone, Debug)]
pub struct TopologyResolver {
    scratch_dir: Utf8PathBuf,
    client: reqwest::Client,
}

impl TopologyResolver {
    /// Creates a resolver that downloads URL references into `scratch_dir`.
    #[must_use]
    pub fn new(scratch_dir: Utf8PathBuf) -> Self {
        Self {
            scratch_dir,
            client: reqwest::Client::new(),
        }
    }

    /// Resolves a reference to a parsed local topology file.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] when the reference is missing,
    /// unreachable, or does not parse as a topology definition.
    pub async fn resolve(&self, reference: &str) -> Result<ResolvedTopology, TopologyError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            self.resolve_url(reference).await
        } else {
            resolve_path(Utf8Path::new(reference))
        }
    }

    async fn resolve_url(&self, url: &str) -> Result<ResolvedTopology, TopologyError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| TopologyError::Download {
                url: url.to_owned(),
                message: err.to_string(),
            })?;
        let body = response.text().await.map_err(|err| TopologyError::Download {
            url: url.to_owned(),
            message: err.to_string(),
        })?;

        let parsed = parse_topology(&body)?;
        let file_name = file_name_from_url(url);
        let path = self.scratch_dir.join(&file_name);
        write_scratch_file(&path, &body)?;

        Ok(ResolvedTopology {
            path,
            file_name,
            parsed,
        })
    }
}

fn resolve_path(path: &Utf8Path) -> Result<ResolvedTopology, TopologyError> {
    if !path.is_file() {
        return Err(TopologyError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| TopologyError::NotFound {
            path: path.to_path_buf(),
        })?
        .to_owned();

    let contents = read_file(path)?;
    let parsed = parse_topology(&contents)?;

    Ok(ResolvedTopology {
        path: path.to_path_buf(),
        file_name,
        parsed,
    })
}

fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.last().map(ToOwned::to_owned))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| String::from(FALLBACK_DOWNLOAD_NAME))
}

fn read_file(path: &Utf8Path) -> Result<String, TopologyError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| TopologyError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a filename"),
    })?;

    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| TopologyError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;
    dir.read_to_string(file_name).map_err(|err| TopologyError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn write_scratch_file(path: &Utf8Path, contents: &str) -> Result<(), TopologyError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| TopologyError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| TopologyError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let file_name = path.file_name().ok_or_else(|| TopologyError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a filename"),
    })?;
    dir.write(file_name, contents).map_err(|err| TopologyError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
