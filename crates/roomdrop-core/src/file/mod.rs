//! File descriptors and byte sources.
//!
//! This module handles:
//! - Describing offered files the way the room backend expects them
//! - Binding each descriptor to the bytes it stands for
//! - Naming received payloads safely on disk
//!
//! Descriptor ids are derived from the file's position in the offered set
//! (`file_0`, `file_1`, ...), so replacing the file list re-numbers them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::{Error, Result};

/// Prefix of index-derived descriptor ids.
pub const FILE_ID_PREFIX: &str = "file_";

/// Metadata for one offerable file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Stable index-derived id (`file_<n>`)
    pub id: String,
    /// Display name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type (empty when unknown)
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Last-modified time in Unix milliseconds
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<i64>,
}

impl FileDescriptor {
    /// Build the id for the file at `index` in the offered set.
    #[must_use]
    pub fn id_for_index(index: usize) -> String {
        format!("{FILE_ID_PREFIX}{index}")
    }
}

/// Where the bytes of an offered file come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file on disk, opened when a request arrives
    Path(PathBuf),
    /// Bytes already in memory
    Memory(Arc<[u8]>),
}

impl FileSource {
    /// Open the source for sequential reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(&self) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self {
            Self::Path(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::FileNotFound(path.display().to_string())
                    } else {
                        Error::Io(e)
                    }
                })?;
                Ok(Box::new(file))
            }
            Self::Memory(bytes) => Ok(Box::new(std::io::Cursor::new(Arc::clone(bytes)))),
        }
    }
}

/// A descriptor together with its byte source.
#[derive(Debug, Clone)]
pub struct OfferedFile {
    /// Advertised metadata
    pub descriptor: FileDescriptor,
    /// Bytes behind the descriptor
    pub source: FileSource,
}

impl OfferedFile {
    /// Offer an in-memory payload.
    #[must_use]
    pub fn from_bytes(index: usize, name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            descriptor: FileDescriptor {
                id: FileDescriptor::id_for_index(index),
                name: name.to_string(),
                size: bytes.len() as u64,
                mime_type: mime_type.to_string(),
                last_modified: Some(chrono::Utc::now().timestamp_millis()),
            },
            source: FileSource::Memory(Arc::from(bytes)),
        }
    }

    /// Offer a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is missing or is not a regular file.
    pub fn from_path(index: usize, path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

        if !metadata.is_file() {
            return Err(Error::FileNotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_default();

        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_millis()).ok());

        Ok(Self {
            descriptor: FileDescriptor {
                id: FileDescriptor::id_for_index(index),
                name,
                size: metadata.len(),
                mime_type,
                last_modified,
            },
            source: FileSource::Path(path.to_path_buf()),
        })
    }
}

/// Offer every path, numbering descriptors in argument order.
///
/// # Errors
///
/// Returns an error if any path cannot be offered.
pub fn offer_paths(paths: &[PathBuf]) -> Result<Vec<OfferedFile>> {
    paths
        .iter()
        .enumerate()
        .map(|(index, path)| OfferedFile::from_path(index, path))
        .collect()
}

/// Reduce a peer-supplied name to a single safe path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}

/// Pick a path under `dir` for `name` that does not overwrite an existing file.
#[must_use]
pub fn unique_output_path(dir: &Path, name: &str) -> PathBuf {
    let name = sanitize_file_name(name);
    let candidate = dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(&name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let ext = path.extension().and_then(|e| e.to_str());

    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Format a byte size for humans.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
