//! File changes and batch validation
//!
//! A [`FileBatch`] is the unit of work for one publish. Everything that can be
//! wrong with a batch is caught here, before any request leaves the process.

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors raised while building a [`FileChange`] or [`FileBatch`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("file batch is empty")]
    Empty,

    #[error("duplicate path in batch: {0}")]
    DuplicatePath(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("'{file}' is used as a file but '{nested}' needs it to be a directory")]
    PathConflict { file: String, nested: String },

    #[error("content of '{path}' is not valid UTF-8")]
    NotUtf8 { path: String },
}

/// One file to write: a repository-relative path and its text content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    path: String,
    content: String,
}

impl FileChange {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Build a change from raw bytes, rejecting anything that is not UTF-8 text
    pub fn from_bytes(path: impl Into<String>, bytes: Vec<u8>) -> Result<Self, BatchError> {
        let path = path.into();
        match String::from_utf8(bytes) {
            Ok(content) => Ok(Self { path, content }),
            Err(_) => Err(BatchError::NotUtf8 { path }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// A validated, non-empty set of file changes with unique paths
#[derive(Debug, Clone)]
pub struct FileBatch {
    files: Vec<FileChange>,
}

impl FileBatch {
    pub fn new(files: Vec<FileChange>) -> Result<Self, BatchError> {
        if files.is_empty() {
            return Err(BatchError::Empty);
        }

        let mut seen = BTreeSet::new();
        for file in &files {
            validate_path(file.path())?;
            if !seen.insert(file.path()) {
                return Err(BatchError::DuplicatePath(file.path().to_string()));
            }
        }

        // BTreeSet orders "a" before "a/b", so a file that is also used as a
        // directory shows up as a prefix of one of its successors.
        let sorted: Vec<&str> = seen.into_iter().collect();
        for (i, file) in sorted.iter().enumerate() {
            let dir_prefix = format!("{}/", file);
            if let Some(nested) = sorted[i + 1..]
                .iter()
                .find(|other| other.starts_with(&dir_prefix))
            {
                return Err(BatchError::PathConflict {
                    file: file.to_string(),
                    nested: nested.to_string(),
                });
            }
        }

        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(FileChange::path)
    }

    pub fn into_files(self) -> Vec<FileChange> {
        self.files
    }
}

fn validate_path(path: &str) -> Result<(), BatchError> {
    let invalid = |reason| BatchError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be repository-relative"));
    }
    if path.ends_with('/') {
        return Err(invalid("path must name a file"));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(invalid("path contains a backslash or NUL"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("path contains an empty segment")),
            "." | ".." => return Err(invalid("path contains a relative segment")),
            _ => {}
        }
    }

    Ok(())
}
