//! # privxfer Engine - Privilege-Crossing Tree Transfer
//!
//! Copies directory trees between locations only a privileged shell can see
//! and a document tree (a provider of named directory/file handles) that the
//! unprivileged side owns.
//!
//! ## Overview
//!
//! - Catalog a tree as a flat list of `FileInfo` records, parents first
//! - Copy the catalog into a document tree with per-entry failure isolation
//! - Copy a document tree back out through the shell, stopping at the first failure
//! - Recover from streams that end early by reopening and skipping
//! - Resolve logical storage locations to real mount paths, with a cache
//! - Fan independent units of work out over a bounded worker pool
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::path::Path;
//! use privxfer_engine::{ensure_directory, transfer_to_document, FsDocumentTree, LocalShell, PrivilegedShell};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let shell = LocalShell::new();
//! let entries = shell.list_tree(Path::new("/data/app/files"))?;
//!
//! let tree = FsDocumentTree::open("/backups")?;
//! let target = ensure_directory(&tree.root(), "files")?;
//!
//! let report = transfer_to_document(&shell, &entries, &target);
//! let counts = report.counts();
//! println!("{} done, {} skipped, {} failed", counts.done, counts.skipped, counts.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Catalog entries and transfer reports
//! - **error**: Error types and handling
//! - **shell**: Privileged shell capability and the local implementation
//! - **document**: Document tree capability and the filesystem implementation
//! - **stream**: Stream copying with the reopen/skip workaround
//! - **transfer**: Tree transfer in both directions
//! - **resolver**: Mount path resolution with caching
//! - **runner**: Bounded parallel task runner
//! - **progress**: Progress callback trait
//! - **config**: Engine configuration

pub mod config;
pub mod document;
pub mod error;
pub mod model;
pub mod progress;
pub mod resolver;
pub mod runner;
pub mod shell;
pub mod stream;
pub mod transfer;

#[cfg(test)]
mod testing;

// Re-export main types and functions
pub use config::{ConfigError, EngineConfig};
pub use document::{
    delete_recursive, ensure_directory, find_path, DocumentHandle, FsDocument, FsDocumentTree, BINARY_MIME_TYPE,
};
pub use error::EngineError;
pub use model::{Direction, EntryOutcome, EntryState, FileInfo, FileType, OutcomeCounts, TransferReport};
pub use progress::TransferProgress;
pub use resolver::{MountConfig, MountPathResolver, ReadablePath, UsablePath, WritablePath, SHADOW_KIND};
pub use runner::{run_parallel, ParallelRunner, TaskFailure, TaskOutcome};
pub use shell::{quote, LocalShell, PrivilegedShell};
pub use stream::{copy_naive, copy_with_reopen, ReopenPolicy};
pub use transfer::{transfer_from_document, transfer_to_document, TreeTransfer};
