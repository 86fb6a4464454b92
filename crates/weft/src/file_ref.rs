//! Canonical file references.
//!
//! A [`FileRef`] is the identity of a record: an absolute, lexically
//! normalized path. Equality is path equality. Relative input is rejected so
//! that identity never depends on ambient process state; absolutizing user
//! input is the CLI boundary's job.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use thiserror::Error;

/// Error constructing a [`FileRef`].
#[derive(Debug, Error)]
pub enum FileRefError {
    #[error("file reference path is empty")]
    EmptyPath,

    #[error("file reference path '{}' is not absolute", path.display())]
    NotAbsolute { path: PathBuf },
}

/// Absolute, normalized identity of a file in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRef(PathBuf);

impl FileRef {
    /// Create a reference from an absolute path, normalizing `.` and `..`
    /// components lexically.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, FileRefError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(FileRefError::EmptyPath);
        }
        if !path.is_absolute() {
            return Err(FileRefError::NotAbsolute {
                path: path.to_path_buf(),
            });
        }
        Ok(Self(path.clean()))
    }

    /// The underlying path.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// The path as a string, for keys, URLs, and wire formats.
    pub fn name(&self) -> Cow<'_, str> {
        self.0.to_string_lossy()
    }

    /// Path basename without its extension.
    pub fn basename(&self) -> String {
        self.0
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File extension including the leading dot, or an empty string.
    pub fn ext(&self) -> String {
        match self.0.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => String::new(),
        }
    }

    /// Containing directory.
    pub fn dir(&self) -> &Path {
        self.0.parent().unwrap_or(Path::new("/"))
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for FileRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
