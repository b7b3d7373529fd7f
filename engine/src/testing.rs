//! In-memory privileged shell and document tree for unit tests.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::document::DocumentHandle;
use crate::error::EngineError;
use crate::model::{FileInfo, FileType};
use crate::shell::PrivilegedShell;

struct FlakyFile {
    data: Arc<Vec<u8>>,
    /// Byte position at which the n-th opened stream reports end-of-stream
    cuts: Vec<usize>,
    fail_after_opens: Option<usize>,
}

/// Shell whose input streams end early at scripted offsets.
///
/// Only reads are served. Writes and commands fail, which makes it usable as
/// a shell that rejects every privileged destination.
#[derive(Default)]
pub(crate) struct FlakyShell {
    files: HashMap<PathBuf, FlakyFile>,
    opens: Mutex<HashMap<PathBuf, usize>>,
}

impl FlakyShell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(mut self, path: &str, data: Vec<u8>, cuts: Vec<usize>) -> Self {
        self.files.insert(
            PathBuf::from(path),
            FlakyFile {
                data: Arc::new(data),
                cuts,
                fail_after_opens: None,
            },
        );
        self
    }

    pub(crate) fn failing_after_opens(mut self, path: &str, opens: usize) -> Self {
        if let Some(file) = self.files.get_mut(Path::new(path)) {
            file.fail_after_opens = Some(opens);
        }
        self
    }

    pub(crate) fn opens(&self, path: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(Path::new(path))
            .copied()
            .unwrap_or(0)
    }
}

pub(crate) struct FlakyReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    end: usize,
}

impl Read for FlakyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let n = buf.len().min(self.end - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl PrivilegedShell for FlakyShell {
    type Input = FlakyReader;
    type Output = io::Sink;

    fn list_tree(&self, root: &Path) -> Result<Vec<FileInfo>, EngineError> {
        Err(EngineError::ListingFailed {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Unsupported, "listing not scripted"),
        })
    }

    fn open_input(&self, path: &Path) -> io::Result<FlakyReader> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such scripted file"))?;

        let mut opens = self.opens.lock().unwrap();
        let count = opens.entry(path.to_path_buf()).or_insert(0);
        let nth = *count;
        *count += 1;

        if file.fail_after_opens.is_some_and(|limit| nth >= limit) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "shell went away"));
        }

        let end = file
            .cuts
            .get(nth)
            .copied()
            .unwrap_or(file.data.len())
            .min(file.data.len());
        Ok(FlakyReader {
            data: Arc::clone(&file.data),
            pos: 0,
            end,
        })
    }

    fn open_output(&self, _path: &Path) -> io::Result<io::Sink> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only shell"))
    }

    fn run(&self, command: &str) -> Result<String, EngineError> {
        Err(EngineError::ShellCommandFailed {
            command: command.to_string(),
            code: Some(1),
            stderr: "read-only shell".to_string(),
        })
    }
}

/// Read-only document node built in memory.
///
/// Unlike a directory-backed tree it can hold children without a name or
/// with names a real provider would refuse.
#[derive(Clone)]
pub(crate) struct MemDocument {
    name: Option<String>,
    /// `None` for directories
    data: Option<Arc<Vec<u8>>>,
    children: Arc<Vec<MemDocument>>,
}

impl MemDocument {
    pub(crate) fn dir(name: Option<&str>, children: Vec<MemDocument>) -> Self {
        MemDocument {
            name: name.map(str::to_string),
            data: None,
            children: Arc::new(children),
        }
    }

    pub(crate) fn file(name: Option<&str>, data: &[u8]) -> Self {
        MemDocument {
            name: name.map(str::to_string),
            data: Some(Arc::new(data.to_vec())),
            children: Arc::new(Vec::new()),
        }
    }

    fn read_only() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "read-only document tree")
    }
}

impl DocumentHandle for MemDocument {
    type Reader = io::Cursor<Vec<u8>>;
    type Writer = io::Sink;

    fn location(&self) -> String {
        format!("mem:{}", self.name.as_deref().unwrap_or("?"))
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn is_directory(&self) -> bool {
        self.data.is_none()
    }

    fn is_file(&self) -> bool {
        self.data.is_some()
    }

    fn len(&self) -> u64 {
        self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0)
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn find_child(&self, name: &str) -> io::Result<Option<Self>> {
        Ok(self
            .children
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
            .cloned())
    }

    fn create_directory(&self, _name: &str) -> io::Result<Self> {
        Err(Self::read_only())
    }

    fn create_file(&self, _mime_type: &str, _name: &str) -> io::Result<Self> {
        Err(Self::read_only())
    }

    fn list_children(&self) -> io::Result<Vec<Self>> {
        Ok(self.children.to_vec())
    }

    fn open_input(&self) -> io::Result<Self::Reader> {
        match &self.data {
            Some(data) => Ok(io::Cursor::new(data.to_vec())),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file")),
        }
    }

    fn open_output(&self) -> io::Result<Self::Writer> {
        Err(Self::read_only())
    }

    fn delete(&self) -> io::Result<()> {
        Err(Self::read_only())
    }
}

pub(crate) fn catalog_file(file_path: &str, absolute: &str, size: u64) -> FileInfo {
    catalog_entry(file_path, absolute, FileType::RegularFile, size)
}

pub(crate) fn catalog_dir(file_path: &str, absolute: &str) -> FileInfo {
    catalog_entry(file_path, absolute, FileType::Directory, 0)
}

pub(crate) fn catalog_entry(file_path: &str, absolute: &str, file_type: FileType, size: u64) -> FileInfo {
    FileInfo {
        file_path: file_path.to_string(),
        absolute_path: PathBuf::from(absolute),
        filename: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
        file_type,
        size,
        permissions: 0o660,
        owner: "u0_a100".to_string(),
        group: "u0_a100".to_string(),
        modified: Utc::now(),
        link_target: None,
    }
}
