//! Progress reporting trait.
//!
//! This module defines the TransferProgress trait, which keeps the transfer
//! engine independent of whatever displays progress (CLI, notifications, ...).

use crate::model::{EntryOutcome, TransferReport};

/// Receives progress updates from a tree transfer.
///
/// All methods are called synchronously on the thread running the transfer.
/// When several transfers run through the parallel runner, one observer may
/// be called from several threads at once.
pub trait TransferProgress: Send + Sync {
    /// Called when the transfer starts.
    fn on_transfer_started(&self, report: &TransferReport);

    /// Called when an entry is about to be processed.
    fn on_entry_started(&self, report: &TransferReport, entry: &EntryOutcome);

    /// Called when an entry reached a terminal state (done, skipped or failed).
    fn on_entry_completed(&self, report: &TransferReport, entry: &EntryOutcome);

    /// Called when the transfer finished, including after a subtree-fatal error.
    fn on_transfer_completed(&self, report: &TransferReport);
}
