//! Byte copies out of privileged streams.
//!
//! Privileged input streams can report end-of-stream in the middle of a file
//! without raising an error. Two copy paths exist:
//!
//! - `copy_naive` copies until the stream ends. A premature end silently
//!   truncates the copy; only use it where that risk is acceptable.
//! - `copy_with_reopen` knows the size from the catalog. When the stream ends
//!   early it reopens the file, skips to the current offset and continues,
//!   until the declared size has been delivered.

use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::FileInfo;
use crate::shell::PrivilegedShell;

/// Limits for `copy_with_reopen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReopenPolicy {
    /// Consecutive reopens allowed without any byte of progress
    pub max_stalled_reopens: u32,

    /// Read buffer size in bytes
    pub buffer_size: usize,
}

impl Default for ReopenPolicy {
    fn default() -> Self {
        ReopenPolicy {
            max_stalled_reopens: 10,
            buffer_size: 64 * 1024,
        }
    }
}

/// Copy a privileged file to `out` until its stream ends.
///
/// The privileged transport may end the stream early, in which case the copy
/// is silently short. Tree transfers use `copy_with_reopen` instead.
pub fn copy_naive<S, W>(shell: &S, path: &Path, out: &mut W) -> Result<u64, EngineError>
where
    S: PrivilegedShell + ?Sized,
    W: Write + ?Sized,
{
    let mut input = shell.open_input(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut buf = vec![0u8; ReopenPolicy::default().buffer_size];
    let mut copied = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        out.write_all(&buf[..n]).map_err(|e| EngineError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
        copied += n as u64;
    }

    out.flush().map_err(|e| EngineError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(copied)
}

/// Copy exactly `info.size` bytes of a privileged file to `out`.
///
/// Reads never go past the declared size. A premature end-of-stream causes a
/// reopen at the current offset; the copy fails if reopening fails or if
/// `policy.max_stalled_reopens` consecutive reopens bring no progress.
pub fn copy_with_reopen<S, W>(
    shell: &S,
    info: &FileInfo,
    out: &mut W,
    policy: &ReopenPolicy,
) -> Result<u64, EngineError>
where
    S: PrivilegedShell + ?Sized,
    W: Write + ?Sized,
{
    let path = info.absolute_path.as_path();
    let expected = info.size;

    let mut input = shell.open_input(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut buf = vec![0u8; policy.buffer_size.max(1)];
    let mut offset = 0u64;
    let mut stalled = 0u32;
    let mut offset_at_reopen = 0u64;
    let mut reopens = 0u32;

    while offset < expected {
        let want = (expected - offset).min(buf.len() as u64) as usize;
        match input.read(&mut buf[..want]) {
            Ok(0) => {
                if offset == offset_at_reopen && reopens > 0 {
                    stalled += 1;
                } else {
                    stalled = 0;
                }
                loop {
                    if stalled >= policy.max_stalled_reopens {
                        warn!(
                            path = %path.display(),
                            offset,
                            expected,
                            reopens,
                            "privileged stream keeps ending early, giving up"
                        );
                        return Err(EngineError::Truncated {
                            path: path.to_path_buf(),
                            offset,
                            expected,
                        });
                    }

                    debug!(path = %path.display(), offset, expected, "premature end of stream, reopening");
                    offset_at_reopen = offset;
                    reopens += 1;
                    match reopen_at(shell, path, offset)? {
                        Some(reopened) => {
                            input = reopened;
                            break;
                        }
                        // Ended again before reaching the offset: no progress
                        None => stalled += 1,
                    }
                }
            }
            Ok(n) => {
                out.write_all(&buf[..n]).map_err(|e| EngineError::WriteError {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    out.flush().map_err(|e| EngineError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })?;
    if reopens > 0 {
        debug!(path = %path.display(), reopens, bytes = offset, "copy completed after reopening");
    }
    Ok(offset)
}

/// Open `path` again and skip to `offset`.
///
/// `None` if the new stream ends before the offset is reached.
fn reopen_at<S>(shell: &S, path: &Path, offset: u64) -> Result<Option<S::Input>, EngineError>
where
    S: PrivilegedShell + ?Sized,
{
    let mut input = shell.open_input(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let skipped = io::copy(&mut input.by_ref().take(offset), &mut io::sink()).map_err(|e| {
        EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    if skipped < offset {
        debug!(path = %path.display(), skipped, offset, "reopened stream ended while skipping");
        return Ok(None);
    }
    Ok(Some(input))
}
