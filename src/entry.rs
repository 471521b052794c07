use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One addressable unit of content under the scan root: a plain file or a
/// member of a (possibly nested) zip archive.
///
/// Entries are immutable snapshots of what the enumerator saw; content is
/// materialized on first use and bounded by the per-entry size cap.
#[derive(Debug)]
pub struct Entry {
    /// Stable virtual path. Zip members are addressed through their archive
    /// chain, e.g. `logs/run.zip/inner/app.log`.
    pub path: String,
    /// Number of zip boundaries crossed to reach this entry (0 = plain file).
    pub depth: u32,
    /// Last-modified time. Zip members without a stored timestamp inherit
    /// the enclosing archive's.
    pub modified: Option<DateTime<Utc>>,
    /// Sibling JSON document captured for this entry's container scope, when
    /// one was requested.
    pub scope_doc: Option<Arc<ScopeDoc>>,
    content: Content,
}

#[derive(Debug)]
enum Content {
    /// Plain file, read on first use.
    Lazy(PathBuf),
    /// Bytes captured while the enclosing archive was open.
    Bytes(Vec<u8>),
    /// Larger than the in-memory cap; excluded from content matching.
    TooLarge,
    /// Never captured because the active selector does not need content.
    Unread,
}

/// Outcome of materializing an entry's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStatus {
    Loaded,
    TooLarge,
    Unread,
}

impl Entry {
    pub fn lazy_file(path: String, file: PathBuf, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            depth: 0,
            modified,
            scope_doc: None,
            content: Content::Lazy(file),
        }
    }

    pub fn from_bytes(
        path: String,
        depth: u32,
        modified: Option<DateTime<Utc>>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            path,
            depth,
            modified,
            scope_doc: None,
            content: Content::Bytes(bytes),
        }
    }

    pub fn too_large(path: String, depth: u32, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            depth,
            modified,
            scope_doc: None,
            content: Content::TooLarge,
        }
    }

    pub fn unread(path: String, depth: u32, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path,
            depth,
            modified,
            scope_doc: None,
            content: Content::Unread,
        }
    }

    pub fn with_scope(mut self, scope: Arc<ScopeDoc>) -> Self {
        self.scope_doc = Some(scope);
        self
    }

    /// Final segment of the virtual path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_zip_member(&self) -> bool {
        self.depth > 0
    }

    /// Materialize content up to `max_bytes`. Repeated calls are cheap; the
    /// first successful load pins the bytes for the rest of the pipeline.
    pub fn load(&mut self, max_bytes: u64) -> Result<ContentStatus> {
        let lazy = match &self.content {
            Content::Bytes(_) => return Ok(ContentStatus::Loaded),
            Content::TooLarge => return Ok(ContentStatus::TooLarge),
            Content::Unread => return Ok(ContentStatus::Unread),
            Content::Lazy(path) => path.clone(),
        };
        match read_capped(&lazy, max_bytes)
            .with_context(|| format!("failed to read {}", self.path))?
        {
            Some(bytes) => {
                self.content = Content::Bytes(bytes);
                Ok(ContentStatus::Loaded)
            }
            None => {
                self.content = Content::TooLarge;
                Ok(ContentStatus::TooLarge)
            }
        }
    }

    /// Content bytes, present only after a successful [`Entry::load`].
    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Sibling JSON document resolved once per container scope (the enclosing
/// archive for zip members, the enclosing directory for plain files).
#[derive(Debug)]
pub struct ScopeDoc {
    /// Virtual path of the container this scope covers.
    pub scope: String,
    pub resolution: ScopeResolution,
}

#[derive(Debug)]
pub enum ScopeResolution {
    /// Exactly one member carried the target name.
    Found { path: String, bytes: Vec<u8> },
    /// No member carried the target name.
    Missing,
    /// More than one member carried the target name; listed for reporting.
    Ambiguous(Vec<String>),
    /// The document exceeded the in-memory size cap.
    TooLarge,
}

/// Read a file fully, or return `None` when it exceeds `max_bytes`.
pub(crate) fn read_capped(path: &Path, max_bytes: u64) -> Result<Option<Vec<u8>>> {
    let file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.take(max_bytes + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > max_bytes {
        return Ok(None);
    }
    Ok(Some(buf))
}
