//! Tree transfers across the privileged/document boundary.
//!
//! - `transfer_to_document` copies a privileged catalog into a document tree.
//!   Every entry is handled on its own: a failure is logged, recorded on the
//!   entry's outcome and the next entry is processed.
//! - `transfer_from_document` copies a document subtree onto the privileged
//!   filesystem. The first failure aborts the call and is returned.
//!
//! The two directions isolate failures differently. Writes into the document
//! tree are many small independent operations, while a rejected privileged
//! destination usually repeats for every sibling.

use std::io::{self, Write};
use std::path::{Component, Path};

use tracing::{debug, info, warn};

use crate::document::{ensure_directory, DocumentHandle, BINARY_MIME_TYPE};
use crate::error::EngineError;
use crate::model::{Direction, EntryOutcome, EntryState, FileInfo, FileType, TransferReport};
use crate::progress::TransferProgress;
use crate::shell::PrivilegedShell;
use crate::stream::{copy_with_reopen, ReopenPolicy};

/// A configured tree transfer over one privileged shell.
pub struct TreeTransfer<'a, S: ?Sized> {
    shell: &'a S,
    policy: ReopenPolicy,
    progress: Option<&'a dyn TransferProgress>,
}

impl<'a, S> TreeTransfer<'a, S>
where
    S: PrivilegedShell + ?Sized,
{
    pub fn new(shell: &'a S) -> Self {
        TreeTransfer {
            shell,
            policy: ReopenPolicy::default(),
            progress: None,
        }
    }

    pub fn with_policy(mut self, policy: ReopenPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn TransferProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Copy `entries` below `destination_root`, recreating their directory
    /// structure. Never fails as a whole; inspect the returned report.
    pub fn to_document<D: DocumentHandle>(&self, entries: &[FileInfo], destination_root: &D) -> TransferReport {
        let mut report = TransferReport::new(
            Direction::ToDocument,
            catalog_root(entries),
            destination_root.location(),
        );
        report.total_bytes_expected = entries
            .iter()
            .filter(|e| e.file_type == FileType::RegularFile)
            .map(|e| e.size)
            .sum();

        if let Some(progress) = self.progress {
            progress.on_transfer_started(&report);
        }

        for entry in entries {
            // Already recorded on the entry's outcome
            let _ = self.track(&mut report, &entry.file_path, entry.file_type, || {
                self.entry_to_document(entry, destination_root)
            });
        }

        report.finish();
        let counts = report.counts();
        info!(
            source = %report.source,
            destination = %report.destination,
            done = counts.done,
            skipped = counts.skipped,
            failed = counts.failed,
            bytes = report.total_bytes_copied,
            "transfer to document finished"
        );
        if let Some(progress) = self.progress {
            progress.on_transfer_completed(&report);
        }
        report
    }

    /// Copy the children of `source_root` into `destination_base`.
    ///
    /// Returns the first error encountered; entries processed before it stay
    /// on the privileged filesystem.
    pub fn from_document<D: DocumentHandle>(
        &self,
        source_root: &D,
        destination_base: &Path,
    ) -> Result<TransferReport, EngineError> {
        let mut report = TransferReport::new(
            Direction::FromDocument,
            source_root.location(),
            destination_base.display().to_string(),
        );
        if let Some(progress) = self.progress {
            progress.on_transfer_started(&report);
        }

        let result = self
            .shell
            .make_dirs(destination_base)
            .and_then(|()| self.children_from_document(source_root, destination_base, "", &mut report));

        report.finish();
        match &result {
            Ok(()) => info!(
                source = %report.source,
                destination = %report.destination,
                entries = report.entries.len(),
                bytes = report.total_bytes_copied,
                "transfer from document finished"
            ),
            Err(e) => warn!(
                source = %report.source,
                destination = %report.destination,
                error = %e,
                "transfer from document aborted"
            ),
        }
        if let Some(progress) = self.progress {
            progress.on_transfer_completed(&report);
        }
        result.map(|()| report)
    }

    /// Run one entry operation, recording its outcome on `report`.
    fn track<F>(
        &self,
        report: &mut TransferReport,
        path: &str,
        file_type: FileType,
        op: F,
    ) -> Result<u64, EngineError>
    where
        F: FnOnce() -> Result<u64, EngineError>,
    {
        let mut outcome = EntryOutcome::pending(path, file_type);
        outcome.state = EntryState::Copying;
        if let Some(progress) = self.progress {
            progress.on_entry_started(report, &outcome);
        }

        let result = op();
        match &result {
            Ok(bytes) => {
                outcome.state = EntryState::Done;
                outcome.bytes_copied = *bytes;
                report.total_bytes_copied += bytes;
                debug!(path, bytes, "entry transferred");
            }
            Err(e @ EngineError::UnsupportedType { .. }) => {
                outcome.state = EntryState::Skipped;
                outcome.error_message = Some(e.to_string());
                warn!(path, %file_type, "entry type not supported by document storage");
            }
            Err(e) => {
                outcome.state = EntryState::Failed;
                outcome.error_code = e.raw_os_error();
                outcome.error_message = Some(e.to_string());
                warn!(path, error = %e, "failed to transfer entry");
            }
        }

        if let Some(progress) = self.progress {
            progress.on_entry_completed(report, &outcome);
        }
        report.entries.push(outcome);
        result
    }

    fn entry_to_document<D: DocumentHandle>(&self, entry: &FileInfo, root: &D) -> Result<u64, EngineError> {
        match entry.file_type {
            FileType::Directory => {
                let parent = document_parent(entry, root)?;
                ensure_directory(&parent, &entry.filename).map_err(|e| {
                    EngineError::document("create_directory", child_location(&parent, &entry.filename), e)
                })?;
                Ok(0)
            }
            FileType::RegularFile => {
                let parent = document_parent(entry, root)?;
                let file = parent
                    .create_file(BINARY_MIME_TYPE, &entry.filename)
                    .map_err(|e| {
                        EngineError::document("create_file", child_location(&parent, &entry.filename), e)
                    })?;

                let copied = file
                    .open_output()
                    .map_err(|e| EngineError::document("open_output", file.location(), e))
                    .and_then(|mut out| copy_with_reopen(self.shell, entry, &mut out, &self.policy));

                if copied.is_err() {
                    // A truncated copy must not pass for a good one
                    if let Err(e) = file.delete() {
                        debug!(location = %file.location(), error = %e, "could not remove partial document");
                    }
                }
                copied
            }
            other => Err(EngineError::UnsupportedType {
                path: entry.absolute_path.clone(),
                file_type: other,
            }),
        }
    }

    fn children_from_document<D: DocumentHandle>(
        &self,
        dir: &D,
        target: &Path,
        rel_path: &str,
        report: &mut TransferReport,
    ) -> Result<(), EngineError> {
        let children = dir
            .list_children()
            .map_err(|e| EngineError::document("list_children", dir.location(), e))?;

        for child in children {
            let name = match child.name() {
                Some(name) => name,
                None => {
                    debug!(location = %child.location(), "skipping document without a name");
                    continue;
                }
            };
            if !is_single_segment(&name) {
                return Err(EngineError::InvalidPath {
                    path: target.join(&name),
                    reason: format!("document name {name:?} is not a single path segment"),
                });
            }

            let target_path = target.join(&name);
            let child_rel = if rel_path.is_empty() {
                name.clone()
            } else {
                format!("{rel_path}/{name}")
            };

            if child.is_directory() {
                self.track(report, &child_rel, FileType::Directory, || {
                    self.shell.make_dirs(&target_path).map(|()| 0)
                })?;
                self.children_from_document(&child, &target_path, &child_rel, report)?;
            } else if child.is_file() {
                report.total_bytes_expected += child.len();
                self.track(report, &child_rel, FileType::RegularFile, || {
                    self.file_from_document(&child, &target_path)
                })?;
            }
        }
        Ok(())
    }

    fn file_from_document<D: DocumentHandle>(&self, source: &D, target: &Path) -> Result<u64, EngineError> {
        let mut output = self
            .shell
            .open_output(target)
            .map_err(|e| EngineError::WriteError {
                path: target.to_path_buf(),
                source: e,
            })?;
        let mut input = source
            .open_input()
            .map_err(|e| EngineError::document("open_input", source.location(), e))?;

        let copied = io::copy(&mut input, &mut output).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                EngineError::WriteError {
                    path: target.to_path_buf(),
                    source: e,
                }
            } else {
                EngineError::ReadError {
                    path: target.to_path_buf(),
                    source: e,
                }
            }
        })?;
        output.flush().map_err(|e| EngineError::WriteError {
            path: target.to_path_buf(),
            source: e,
        })?;
        drop(output);

        if let Some(modified) = source.last_modified() {
            if let Err(e) = self.shell.set_modified(target, modified) {
                warn!(path = %target.display(), error = %e, "failed to restore modification time");
            }
        }
        Ok(copied)
    }
}

/// Copy a privileged catalog into a document tree with default settings.
pub fn transfer_to_document<S, D>(shell: &S, entries: &[FileInfo], destination_root: &D) -> TransferReport
where
    S: PrivilegedShell + ?Sized,
    D: DocumentHandle,
{
    TreeTransfer::new(shell).to_document(entries, destination_root)
}

/// Copy a document subtree onto the privileged filesystem with default settings.
pub fn transfer_from_document<S, D>(
    shell: &S,
    source_root: &D,
    destination_base: &Path,
) -> Result<TransferReport, EngineError>
where
    S: PrivilegedShell + ?Sized,
    D: DocumentHandle,
{
    TreeTransfer::new(shell).from_document(source_root, destination_base)
}

/// Find or create the document directory matching the entry's parent path.
fn document_parent<D: DocumentHandle>(entry: &FileInfo, root: &D) -> Result<D, EngineError> {
    let mut current = root.clone();
    for segment in entry.parent_path().split('/').filter(|s| !s.is_empty()) {
        if !is_single_segment(segment) {
            return Err(EngineError::InvalidPath {
                path: entry.absolute_path.clone(),
                reason: format!("catalog path {:?} leaves the listing root", entry.file_path),
            });
        }
        current = ensure_directory(&current, segment).map_err(|e| {
            EngineError::document("create_directory", child_location(&current, segment), e)
        })?;
    }
    Ok(current)
}

fn is_single_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
}

fn child_location<D: DocumentHandle>(parent: &D, name: &str) -> String {
    format!("{}/{}", parent.location().trim_end_matches('/'), name)
}

fn catalog_root(entries: &[FileInfo]) -> String {
    entries
        .first()
        .map(|e| {
            let absolute = e.absolute_path.to_string_lossy();
            absolute
                .strip_suffix(e.file_path.as_str())
                .map(|root| root.trim_end_matches('/').to_string())
                .unwrap_or_else(|| absolute.into_owned())
        })
        .unwrap_or_default()
}
