//! Sandboxed document tree access.
//!
//! A document tree hands out handles instead of paths. A handle can look up,
//! create and list its children, open byte streams and delete itself; where
//! it lives is only known through an opaque `location`. Handles are addressed
//! relative to a root handle supplied by the caller.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

/// MIME type used for every file created by a tree transfer.
pub const BINARY_MIME_TYPE: &str = "application/octet-stream";

/// A node in a document tree.
pub trait DocumentHandle: Sized + Clone + Send {
    type Reader: io::Read + Send;
    type Writer: io::Write + Send;

    /// Opaque identifier of this node, suitable for logs
    fn location(&self) -> String;

    /// Display name, if the provider can resolve one
    fn name(&self) -> Option<String>;

    fn is_directory(&self) -> bool;

    fn is_file(&self) -> bool;

    /// Length in bytes (0 for directories)
    fn len(&self) -> u64;

    fn last_modified(&self) -> Option<DateTime<Utc>>;

    /// Look up a direct child by name. A missing child is `Ok(None)`.
    fn find_child(&self, name: &str) -> io::Result<Option<Self>>;

    fn create_directory(&self, name: &str) -> io::Result<Self>;

    /// Create an empty file, replacing the contents of an existing file of
    /// the same name.
    fn create_file(&self, mime_type: &str, name: &str) -> io::Result<Self>;

    fn list_children(&self) -> io::Result<Vec<Self>>;

    fn open_input(&self) -> io::Result<Self::Reader>;

    fn open_output(&self) -> io::Result<Self::Writer>;

    fn delete(&self) -> io::Result<()>;
}

/// Find the directory `name` under `parent`, creating it if missing.
pub fn ensure_directory<D: DocumentHandle>(parent: &D, name: &str) -> io::Result<D> {
    match parent.find_child(name)? {
        Some(existing) if existing.is_directory() => Ok(existing),
        Some(existing) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", existing.location()),
        )),
        None => parent.create_directory(name),
    }
}

/// Walk `relative` ('/'-separated) below `root`; `None` if any segment is missing.
pub fn find_path<D: DocumentHandle>(root: &D, relative: &str) -> io::Result<Option<D>> {
    let mut segments = relative.split('/').filter(|s| !s.is_empty());
    let first = match segments.next() {
        Some(first) => first,
        None => return Ok(None),
    };
    let mut current = match root.find_child(first)? {
        Some(found) => found,
        None => return Ok(None),
    };
    for segment in segments {
        current = match current.find_child(segment)? {
            Some(found) => found,
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

/// Delete `handle` and everything below it, children first.
///
/// Returns false as soon as any delete fails; the failure is logged and the
/// remaining siblings are left in place.
pub fn delete_recursive<D: DocumentHandle>(handle: &D) -> bool {
    if handle.is_directory() {
        let children = match handle.list_children() {
            Ok(children) => children,
            Err(e) => {
                warn!(location = %handle.location(), error = %e, "failed to list document for deletion");
                return false;
            }
        };
        for child in &children {
            if !delete_recursive(child) {
                return false;
            }
        }
    } else if !handle.is_file() {
        return false;
    }

    match handle.delete() {
        Ok(()) => true,
        Err(e) => {
            warn!(location = %handle.location(), error = %e, "failed to delete document");
            false
        }
    }
}

/// Document tree stored in a local directory.
///
/// Handles carry a `tree:`-prefixed location relative to the tree root and
/// never reveal the backing path. Used by the CLI and in tests.
#[derive(Debug, Clone)]
pub struct FsDocumentTree {
    root: Arc<PathBuf>,
}

impl FsDocumentTree {
    /// Open an existing directory as a document tree.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "document tree root must be a directory",
            ));
        }
        Ok(FsDocumentTree {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> FsDocument {
        FsDocument {
            root: Arc::clone(&self.root),
            relative: PathBuf::new(),
            is_dir: true,
        }
    }
}

/// Handle into an `FsDocumentTree`.
#[derive(Debug, Clone)]
pub struct FsDocument {
    root: Arc<PathBuf>,
    relative: PathBuf,
    is_dir: bool,
}

impl FsDocument {
    fn backing_path(&self) -> PathBuf {
        self.root.join(&self.relative)
    }

    fn child(&self, name: &str, is_dir: bool) -> FsDocument {
        FsDocument {
            root: Arc::clone(&self.root),
            relative: self.relative.join(name),
            is_dir,
        }
    }

    fn require_directory(&self) -> io::Result<()> {
        if self.is_dir {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", self.location()),
            ))
        }
    }
}

fn validate_name(name: &str) -> io::Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('/') => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid document name: {name:?}"),
        )),
    }
}

impl DocumentHandle for FsDocument {
    type Reader = fs::File;
    type Writer = fs::File;

    fn location(&self) -> String {
        format!("tree:{}", self.relative.to_string_lossy())
    }

    fn name(&self) -> Option<String> {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn is_directory(&self) -> bool {
        self.is_dir
    }

    fn is_file(&self) -> bool {
        !self.is_dir
    }

    fn len(&self) -> u64 {
        if self.is_dir {
            return 0;
        }
        fs::metadata(self.backing_path()).map(|m| m.len()).unwrap_or(0)
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        fs::metadata(self.backing_path())
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    fn find_child(&self, name: &str) -> io::Result<Option<Self>> {
        self.require_directory()?;
        validate_name(name)?;
        match fs::metadata(self.backing_path().join(name)) {
            Ok(metadata) => Ok(Some(self.child(name, metadata.is_dir()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_directory(&self, name: &str) -> io::Result<Self> {
        self.require_directory()?;
        validate_name(name)?;
        fs::create_dir(self.backing_path().join(name))?;
        Ok(self.child(name, true))
    }

    fn create_file(&self, _mime_type: &str, name: &str) -> io::Result<Self> {
        self.require_directory()?;
        validate_name(name)?;
        fs::File::create(self.backing_path().join(name))?;
        Ok(self.child(name, false))
    }

    fn list_children(&self) -> io::Result<Vec<Self>> {
        self.require_directory()?;
        let mut children = Vec::new();
        for entry in fs::read_dir(self.backing_path())? {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            children.push(self.child(&entry.file_name().to_string_lossy(), is_dir));
        }
        Ok(children)
    }

    fn open_input(&self) -> io::Result<fs::File> {
        fs::File::open(self.backing_path())
    }

    fn open_output(&self) -> io::Result<fs::File> {
        if self.is_dir {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", self.location()),
            ));
        }
        fs::File::create(self.backing_path())
    }

    fn delete(&self) -> io::Result<()> {
        if self.relative.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "the tree root cannot be deleted",
            ));
        }
        if self.is_dir {
            fs::remove_dir(self.backing_path())
        } else {
            fs::remove_file(self.backing_path())
        }
    }
}
