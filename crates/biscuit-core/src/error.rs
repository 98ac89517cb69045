//! Error types for the Biscuit core library.
//!
//! Structural errors describe folders that do not follow the BIDS layout;
//! the remaining variants cover merge conflicts, copy integrity and IO.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Biscuit operations.
#[derive(Debug, Error)]
pub enum BiscuitError {
    // BIDS structure errors
    #[error("Folder does not match the BIDS layout at {path}: {reason}")]
    Mapping { path: PathBuf, reason: String },

    #[error("Invalid BIDS identifier {name:?}: expected a '{expected_prefix}-<id>' name")]
    InvalidId {
        name: String,
        expected_prefix: String,
    },

    #[error("Project {0} doesn't exist")]
    NoProject(String),

    #[error("Subject {subject} doesn't exist in project {project}")]
    NoSubject { project: String, subject: String },

    #[error("Session {session} doesn't exist for subject {subject}")]
    NoSession { subject: String, session: String },

    #[error("Scan {filename} doesn't exist in session {session}")]
    NoScan { session: String, filename: String },

    // Merge errors
    #[error("{} file(s) already exist in the destination: {}", conflicts.len(), summarize_paths(conflicts))]
    MergeConflict { conflicts: Vec<PathBuf> },

    #[error("{src} and {dst} are the same file")]
    SameFile { src: PathBuf, dst: PathBuf },

    // Copy integrity errors
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{src} wasn't copied over correctly after {attempts} attempts")]
    CopyVerificationFailed {
        src: PathBuf,
        dst: PathBuf,
        attempts: u32,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("TSV error in {path:?}: {message}")]
    Tsv {
        message: String,
        path: Option<PathBuf>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Biscuit operations.
pub type Result<T> = std::result::Result<T, BiscuitError>;

fn summarize_paths(paths: &[PathBuf]) -> String {
    const SHOWN: usize = 5;
    let mut listed: Vec<String> = paths
        .iter()
        .take(SHOWN)
        .map(|p| p.display().to_string())
        .collect();
    if paths.len() > SHOWN {
        listed.push(format!("... and {} more", paths.len() - SHOWN));
    }
    listed.join(", ")
}

impl From<std::io::Error> for BiscuitError {
    fn from(err: std::io::Error) -> Self {
        BiscuitError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BiscuitError {
    fn from(err: serde_json::Error) -> Self {
        BiscuitError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for BiscuitError {
    fn from(err: csv::Error) -> Self {
        BiscuitError::Tsv {
            message: err.to_string(),
            path: None,
        }
    }
}

impl BiscuitError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BiscuitError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a mapping error for a folder that breaks the BIDS layout.
    pub fn mapping(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BiscuitError::Mapping {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error describes a BIDS structure violation rather than
    /// an IO or integrity failure.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            BiscuitError::Mapping { .. }
                | BiscuitError::InvalidId { .. }
                | BiscuitError::NoProject(_)
                | BiscuitError::NoSubject { .. }
                | BiscuitError::NoSession { .. }
                | BiscuitError::NoScan { .. }
        )
    }
}
