//! Job failure types.
//!
//! Errors are values here: a failing job poisons its memoization slot, and
//! every later caller receives a clone of the original failure.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias for record jobs.
pub type JobResult<T> = Result<T, JobError>;

/// Line/column position inside a source file, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Failure of a record job.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The file could not be read or stat'd.
    #[error("io error for '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// The parser rejected the file.
    #[error("parse error in '{}'{}: {message}", path.display(), fmt_location(*location))]
    Parse {
        path: PathBuf,
        location: Option<SourceLocation>,
        message: String,
    },

    /// An identifier could not be resolved from its base directory.
    #[error("unable to resolve '{identifier}' from '{}': {message}", base_dir.display())]
    Resolve {
        identifier: String,
        base_dir: PathBuf,
        message: String,
    },

    /// The job does not apply to files with this extension.
    #[error("unknown extension '{ext}' for '{}'", path.display())]
    UnknownExtension { path: PathBuf, ext: String },
}

impl JobError {
    pub fn io(path: &Path, message: impl fmt::Display) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn parse(path: &Path, location: Option<SourceLocation>, message: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            location,
            message: message.to_string(),
        }
    }

    pub fn resolve(identifier: &str, base_dir: &Path, message: impl fmt::Display) -> Self {
        Self::Resolve {
            identifier: identifier.to_string(),
            base_dir: base_dir.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn unknown_extension(path: &Path, ext: &str) -> Self {
        Self::UnknownExtension {
            path: path.to_path_buf(),
            ext: ext.to_string(),
        }
    }
}

fn fmt_location(location: Option<SourceLocation>) -> String {
    match location {
        Some(location) => format!(" at {location}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_error_names_identifier_and_base_dir() {
        let err = JobError::resolve("./missing", Path::new("/srv/app"), "no candidate matched");
        let text = err.to_string();
        assert!(text.contains("./missing"));
        assert!(text.contains("/srv/app"));
    }

    #[test]
    fn parse_error_includes_location_when_known() {
        let err = JobError::parse(
            Path::new("/srv/app/a.js"),
            Some(SourceLocation { line: 3, column: 7 }),
            "unexpected token",
        );
        assert!(err.to_string().contains("3:7"));
    }
}
