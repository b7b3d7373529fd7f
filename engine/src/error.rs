//! Error types for the transfer engine.
//!
//! `EngineError` covers failures of a single operation: a listing, a stream,
//! a document call or a shell command. Whether such an error stops a transfer
//! depends on the direction. Copies into the document tree record the error on
//! the entry's `EntryOutcome` and keep going; copies out of the document tree
//! return it to the caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::FileType;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Listing a privileged directory failed
    #[error("failed to list directory: {}", path.display())]
    ListingFailed { path: PathBuf, source: io::Error },

    /// Failed to read from a privileged or document stream
    #[error("failed to read file: {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to a privileged or document stream
    #[error("failed to write file: {}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// The privileged stream kept ending early and could not be resumed
    #[error("stream for {} ended at {offset} of {expected} bytes", path.display())]
    Truncated {
        path: PathBuf,
        offset: u64,
        expected: u64,
    },

    /// A document tree operation failed
    #[error("document operation `{op}` failed at {location}")]
    Document {
        op: &'static str,
        location: String,
        source: io::Error,
    },

    /// The entry type cannot be represented in the document tree
    #[error("unsupported entry type {file_type} for {}", path.display())]
    UnsupportedType { path: PathBuf, file_type: FileType },

    /// A privileged shell command exited unsuccessfully
    #[error("shell command failed (exit {code:?}): {command}: {stderr}")]
    ShellCommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A path or document name cannot be mapped across the boundary
    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ListingFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::Document { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn document(op: &'static str, location: impl Into<String>, source: io::Error) -> Self {
        Self::Document {
            op,
            location: location.into(),
            source,
        }
    }
}
