//! Core data model for tree transfers.
//!
//! This module defines the values that flow through the engine:
//! - FileInfo: one entry of a privileged listing (the unit of traversal)
//! - TransferReport: the per-entry result of one tree transfer
//! - EntryOutcome, EntryState, Direction: bookkeeping for the report

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of an entry on the privileged filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
    /// Sockets, pipes, device nodes
    Special,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::RegularFile => write!(f, "regular file"),
            FileType::Directory => write!(f, "directory"),
            FileType::Symlink => write!(f, "symlink"),
            FileType::Special => write!(f, "special file"),
        }
    }
}

/// One entry of a privileged directory listing.
///
/// A catalog is a `Vec<FileInfo>` produced by a single listing. Entries are
/// snapshots: they are never updated after the listing and are dropped after
/// the transfer that consumed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the listing root, '/'-separated (e.g. "a/x.bin")
    pub file_path: String,

    /// Absolute privileged-side path used to open streams
    pub absolute_path: PathBuf,

    /// Last path segment
    pub filename: String,

    pub file_type: FileType,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Permission bits as reported by the listing
    pub permissions: u32,

    pub owner: String,

    pub group: String,

    pub modified: DateTime<Utc>,

    /// Target of a symlink, if this entry is one
    pub link_target: Option<PathBuf>,
}

impl FileInfo {
    /// The catalog-relative parent path of this entry ("" for top-level entries).
    pub fn parent_path(&self) -> &str {
        let trimmed = self.file_path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => &trimmed[..idx],
            None => "",
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Which side of the boundary a transfer reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Privileged filesystem into the document tree (backup)
    ToDocument,
    /// Document tree onto the privileged filesystem (restore)
    FromDocument,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToDocument => write!(f, "to-document"),
            Direction::FromDocument => write!(f, "from-document"),
        }
    }
}

/// The state of an individual entry within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// Not yet processed
    Pending,
    /// Currently transferring
    Copying,
    /// File copied or directory present at the destination
    Done,
    /// Entry type not supported by the destination
    Skipped,
    /// Error occurred; entry not transferred
    Failed,
}

/// Result of transferring one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub id: Uuid,

    /// Catalog-relative path of the entry
    pub path: String,

    pub file_type: FileType,

    pub state: EntryState,

    pub bytes_copied: u64,

    /// OS error code if state is Failed
    pub error_code: Option<i32>,

    /// Human-readable error message for Failed and Skipped entries
    pub error_message: Option<String>,
}

impl EntryOutcome {
    pub fn pending(path: impl Into<String>, file_type: FileType) -> Self {
        EntryOutcome {
            id: Uuid::new_v4(),
            path: path.into(),
            file_type,
            state: EntryState::Pending,
            bytes_copied: 0,
            error_code: None,
            error_message: None,
        }
    }
}

/// Entry counts by terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Per-entry report of one tree transfer.
///
/// The report deliberately has no overall pass/fail flag: a backup with a few
/// failed entries is still a backup, and the caller decides whether it is
/// usable by inspecting `entries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    pub id: Uuid,

    pub direction: Direction,

    /// Human-readable description of the source root
    pub source: String,

    /// Human-readable description of the destination root
    pub destination: String,

    pub entries: Vec<EntryOutcome>,

    /// Sum of the declared sizes of regular files
    pub total_bytes_expected: u64,

    pub total_bytes_copied: u64,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferReport {
    pub fn new(direction: Direction, source: impl Into<String>, destination: impl Into<String>) -> Self {
        TransferReport {
            id: Uuid::new_v4(),
            direction,
            source: source.into(),
            destination: destination.into(),
            entries: Vec::new(),
            total_bytes_expected: 0,
            total_bytes_copied: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for entry in &self.entries {
            match entry.state {
                EntryState::Done => counts.done += 1,
                EntryState::Skipped => counts.skipped += 1,
                EntryState::Failed => counts.failed += 1,
                EntryState::Pending | EntryState::Copying => {}
            }
        }
        counts
    }

    pub fn failed_entries(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| e.state == EntryState::Failed)
    }

    pub fn entry(&self, path: &str) -> Option<&EntryOutcome> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
