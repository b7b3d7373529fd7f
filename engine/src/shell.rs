//! Privileged filesystem access.
//!
//! The engine never touches privileged paths directly. It goes through a
//! `PrivilegedShell`, which lists directory trees into `FileInfo` catalogs,
//! opens path-addressed byte streams and runs simple commands with quoted
//! arguments. Acquiring the privilege is the implementor's business.
//!
//! `LocalShell` is the implementation for a process that already runs with
//! the required privilege: listings and streams use the filesystem directly
//! and commands go through a launcher such as `sh -c` or `su -c`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::EngineError;
use crate::model::{FileInfo, FileType};

/// Capability to read and write the privileged filesystem.
///
/// Streams returned by `open_input` may end early without an error; see
/// `stream::copy_with_reopen` for the copy path that tolerates this.
pub trait PrivilegedShell: Send + Sync {
    type Input: io::Read + Send;
    type Output: io::Write + Send;

    /// List `root` recursively. Entry paths are relative to `root` and every
    /// directory precedes its descendants.
    fn list_tree(&self, root: &Path) -> Result<Vec<FileInfo>, EngineError>;

    fn open_input(&self, path: &Path) -> io::Result<Self::Input>;

    /// Open `path` for writing, truncating an existing file.
    fn open_output(&self, path: &Path) -> io::Result<Self::Output>;

    /// Run a command line and return its standard output.
    fn run(&self, command: &str) -> Result<String, EngineError>;

    /// Create `path` and any missing parents.
    fn make_dirs(&self, path: &Path) -> Result<(), EngineError> {
        self.run(&format!("mkdir -p {}", quote(&path.to_string_lossy())))
            .map(|_| ())
    }

    fn set_modified(&self, path: &Path, time: DateTime<Utc>) -> Result<(), EngineError> {
        self.run(&format!(
            "touch -m -d @{} {}",
            time.timestamp(),
            quote(&path.to_string_lossy())
        ))
        .map(|_| ())
    }
}

/// Quote an argument for a POSIX shell command line.
///
/// The result is wrapped in double quotes with `\`, `"`, `` ` `` and `$`
/// escaped, so it survives one round of shell parsing unchanged.
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '\\' | '"' | '`' | '$') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Shell for a process that already holds the needed privilege.
#[derive(Debug, Clone)]
pub struct LocalShell {
    program: String,
    args: Vec<String>,
}

impl Default for LocalShell {
    fn default() -> Self {
        LocalShell {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands through `launcher` instead of `sh -c`; the command line
    /// is appended as the last argument (e.g. `["su", "-c"]`).
    pub fn with_launcher<I, S>(launcher: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut launcher = launcher.into_iter().map(Into::into);
        match launcher.next() {
            Some(program) => LocalShell {
                program,
                args: launcher.collect(),
            },
            None => Self::default(),
        }
    }
}

impl PrivilegedShell for LocalShell {
    type Input = fs::File;
    type Output = fs::File;

    fn list_tree(&self, root: &Path) -> Result<Vec<FileInfo>, EngineError> {
        let mut items = Vec::new();

        fn recurse(path: &Path, rel_path: &str, items: &mut Vec<FileInfo>) -> Result<(), EngineError> {
            let entries = fs::read_dir(path).map_err(|e| EngineError::ListingFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

            for entry in entries {
                let entry = entry.map_err(|e| EngineError::ListingFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                let entry_path = entry.path();
                let metadata = fs::symlink_metadata(&entry_path).map_err(|e| {
                    EngineError::ListingFailed {
                        path: entry_path.clone(),
                        source: e,
                    }
                })?;

                let filename = entry.file_name().to_string_lossy().into_owned();
                let file_path = if rel_path.is_empty() {
                    filename.clone()
                } else {
                    format!("{rel_path}/{filename}")
                };

                let info = file_info(&entry_path, file_path, filename, &metadata);
                let is_dir = info.is_dir();
                let child_rel = info.file_path.clone();
                items.push(info);

                if is_dir {
                    recurse(&entry_path, &child_rel, items)?;
                }
            }
            Ok(())
        }

        recurse(root, "", &mut items)?;
        debug!(root = %root.display(), entries = items.len(), "listed privileged tree");
        Ok(items)
    }

    fn open_input(&self, path: &Path) -> io::Result<fs::File> {
        fs::File::open(path)
    }

    fn open_output(&self, path: &Path) -> io::Result<fs::File> {
        fs::File::create(path)
    }

    fn run(&self, command: &str) -> Result<String, EngineError> {
        debug!(command, program = %self.program, "running privileged command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .output()
            .map_err(|e| EngineError::ShellCommandFailed {
                command: command.to_string(),
                code: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(EngineError::ShellCommandFailed {
                command: command.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn set_modified(&self, path: &Path, time: DateTime<Utc>) -> Result<(), EngineError> {
        let mtime = filetime::FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
        filetime::set_file_mtime(path, mtime).map_err(|e| EngineError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn file_info(path: &Path, file_path: String, filename: String, metadata: &fs::Metadata) -> FileInfo {
    let ft = metadata.file_type();
    let file_type = if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::RegularFile
    } else {
        FileType::Special
    };

    let link_target = if file_type == FileType::Symlink {
        fs::read_link(path).ok()
    } else {
        None
    };

    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

    let (permissions, owner, group) = ownership(metadata);

    FileInfo {
        file_path,
        absolute_path: PathBuf::from(path),
        filename,
        file_type,
        size: if file_type == FileType::RegularFile {
            metadata.len()
        } else {
            0
        },
        permissions,
        owner,
        group,
        modified,
        link_target,
    }
}

#[cfg(unix)]
fn ownership(metadata: &fs::Metadata) -> (u32, String, String) {
    use nix::unistd::{Gid, Group, Uid, User};
    use std::os::unix::fs::MetadataExt;

    let uid = metadata.uid();
    let gid = metadata.gid();
    let owner = User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| uid.to_string());
    let group = Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name)
        .unwrap_or_else(|| gid.to_string());
    (metadata.mode() & 0o7777, owner, group)
}

#[cfg(not(unix))]
fn ownership(metadata: &fs::Metadata) -> (u32, String, String) {
    let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    (mode, String::new(), String::new())
}
