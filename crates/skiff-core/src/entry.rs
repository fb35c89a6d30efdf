//! Scanned entries and their content handles.

use std::path::PathBuf;
use std::sync::Arc;

use crate::bridge::SessionHandle;

/// Where the bytes of a file entry come from.
#[derive(Debug, Clone)]
pub enum ContentHandle {
    /// A file on the local disk.
    Local(PathBuf),
    /// A dropped blob with no backing path.
    Memory(Arc<[u8]>),
    /// A file inside a remote session.
    Remote { session: SessionHandle, path: String },
}

impl ContentHandle {
    /// The local path, if the content lives on the local disk.
    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Local(path) => Some(path),
            _ => None,
        }
    }

    /// Whether reading this handle goes through a remote session.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// One scanned file or directory.
///
/// `relative_path` is slash-separated and relative to the scan root, so the
/// first segment names the dropped item the entry belongs to.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Root-relative path using `/` separators.
    pub relative_path: String,
    /// Byte source for files; `None` for directories.
    pub content: Option<ContentHandle>,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// File size in bytes (0 for directories).
    pub size: u64,
    /// Location of a directory on the local disk, used by the archive strategy.
    pub origin: Option<PathBuf>,
}

impl Entry {
    /// Create a file entry.
    pub fn file(relative_path: impl Into<String>, content: ContentHandle, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: Some(content),
            is_directory: false,
            size,
            origin: None,
        }
    }

    /// Create a directory placeholder entry.
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: None,
            is_directory: true,
            size: 0,
            origin: None,
        }
    }

    /// Attach the local directory this entry was scanned from.
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Number of path segments (`a` is 1, `a/b` is 2).
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// First path segment.
    pub fn root_name(&self) -> &str {
        self.segments().next().unwrap_or("")
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    /// Ancestor directories of this entry, shallowest first, excluding the entry itself.
    pub fn ancestors(&self) -> Vec<String> {
        let segments: Vec<&str> = self.segments().collect();
        (1..segments.len())
            .map(|n| segments[..n].join("/"))
            .collect()
    }

    /// Whether the entry belongs to a folder bundle rather than standing alone.
    pub fn is_bundled(&self) -> bool {
        self.is_directory || self.depth() > 1
    }

    /// Copy of this entry with its last path segment replaced.
    pub fn renamed(&self, file_name: &str) -> Self {
        let relative_path = match self.relative_path.trim_end_matches('/').rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/{file_name}"),
            None => file_name.to_string(),
        };
        Self {
            relative_path,
            ..self.clone()
        }
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.relative_path.split('/').filter(|s| !s.is_empty())
    }
}

/// Join a destination root and a relative path with `/`.
pub fn join_path(root: &str, relative: &str) -> String {
    let absolute = root.starts_with('/');
    let root = root.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if root.is_empty() && absolute {
        format!("/{relative}")
    } else if root.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{relative}")
    }
}
