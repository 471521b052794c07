use crate::entry::{Entry, ScopeDoc, ScopeResolution, read_capped};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::ffi::OsStr;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

/// Which entries a scan considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Plain files and archive members.
    #[default]
    All,
    /// Archive members only.
    ZipOnly,
    /// Plain files only; archives are ordinary files and are not opened.
    FileOnly,
}

/// How much entry content the walk captures. Zip member bytes can only be
/// taken while the archive is open, so the policy is decided up front.
#[derive(Clone, Default)]
pub enum ContentPolicy {
    /// Content is never captured (name scans).
    #[default]
    None,
    /// Content is captured for entries whose virtual path passes the filter.
    Matching(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl ContentPolicy {
    pub fn all() -> Self {
        ContentPolicy::Matching(Arc::new(|_| true))
    }

    fn wants(&self, path: &str) -> bool {
        match self {
            ContentPolicy::None => false,
            ContentPolicy::Matching(filter) => filter(path),
        }
    }
}

/// Events reported while a tree is enumerated.
///
/// `entry` errors abort the walk (the driver uses this for output failures);
/// everything the walker itself hits is routed through `warn` or `info` and
/// the walk continues.
pub trait EntrySink {
    fn entry(&mut self, entry: Entry) -> Result<()>;
    /// Recoverable per-entry problem.
    fn warn(&mut self, message: String);
    /// Verbose-only detail.
    fn info(&mut self, message: String);
    /// A container (directory or archive) was opened.
    fn container(&mut self, _path: &str) {}
}

/// Ordered work units derived from the scan root.
pub struct ScanPlan {
    pub units: Vec<PathBuf>,
    /// Sibling-document scope of the root directory itself, applied to
    /// plain-file units directly under it.
    pub root_scope: Option<Arc<ScopeDoc>>,
}

/// Archive-aware enumerator. Stateless; repeated walks over an unchanged
/// tree yield identical sequences.
pub struct Walker {
    pub traversal: Traversal,
    pub content: ContentPolicy,
    pub max_entry_bytes: u64,
    /// Sibling document name resolved once per archive or directory scope.
    pub sibling_target: Option<String>,
}

impl Walker {
    /// Resolve the scan root into ordered work units. Fails when the root
    /// itself cannot be read; everything below that is recoverable.
    pub fn plan(&self, root: &Path, warn: &mut dyn FnMut(String)) -> Result<ScanPlan> {
        let meta = fs::symlink_metadata(root)
            .with_context(|| format!("cannot open root path {}", root.display()))?;
        if !meta.is_dir() {
            return Ok(ScanPlan {
                units: vec![root.to_path_buf()],
                root_scope: None,
            });
        }
        let mut units = Vec::new();
        for child in fs::read_dir(root)
            .with_context(|| format!("cannot read root directory {}", root.display()))?
        {
            units.push(child?.path());
        }
        units.sort();
        let root_scope = self.dir_scope(&virtual_path(root), &units, warn);
        Ok(ScanPlan { units, root_scope })
    }

    /// Convenience for sequential scans and tests: plan the root and walk
    /// every unit in order.
    pub fn walk(&self, root: &Path, sink: &mut dyn EntrySink) -> Result<()> {
        let plan = {
            let mut warn = |message| sink.warn(message);
            self.plan(root, &mut warn)?
        };
        for unit in &plan.units {
            self.walk_unit(unit, plan.root_scope.as_ref(), sink)?;
        }
        Ok(())
    }

    /// Walk one unit from a scan plan. `dir_scope` is the sibling-document
    /// scope of the unit's parent directory, used for plain-file units.
    pub fn walk_unit(
        &self,
        path: &Path,
        dir_scope: Option<&Arc<ScopeDoc>>,
        sink: &mut dyn EntrySink,
    ) -> Result<()> {
        let vpath = virtual_path(path);
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                sink.warn(format!("{vpath}: {err}"));
                return Ok(());
            }
        };
        if meta.file_type().is_symlink() {
            sink.info(format!("skipping symlink {vpath}"));
        } else if meta.is_dir() {
            self.walk_dir(path, sink)?;
        } else if is_zip_name(&vpath) && self.traversal != Traversal::FileOnly {
            sink.container(&vpath);
            match fs::File::open(path) {
                Ok(file) => {
                    let modified = modified_time(&meta);
                    self.walk_zip(&vpath, file, 1, modified, sink)?;
                }
                Err(err) => sink.warn(format!("{vpath}: {err}")),
            }
        } else if meta.is_file() {
            if self.traversal == Traversal::ZipOnly {
                sink.info(format!("skipping plain file {vpath}"));
            } else {
                let mut entry = if self.content.wants(&vpath) {
                    Entry::lazy_file(vpath, path.to_path_buf(), modified_time(&meta))
                } else {
                    Entry::unread(vpath, 0, modified_time(&meta))
                };
                if let Some(scope) = dir_scope {
                    entry = entry.with_scope(Arc::clone(scope));
                }
                sink.entry(entry)?;
            }
        } else {
            sink.info(format!("skipping special file {vpath}"));
        }
        Ok(())
    }

    fn walk_dir(&self, path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
        let vpath = virtual_path(path);
        sink.container(&vpath);
        let mut children = Vec::new();
        match fs::read_dir(path) {
            Ok(iter) => {
                for child in iter {
                    match child {
                        Ok(child) => children.push(child.path()),
                        Err(err) => sink.warn(format!("{vpath}: {err}")),
                    }
                }
            }
            Err(err) => {
                sink.warn(format!("{vpath}: {err}"));
                return Ok(());
            }
        }
        children.sort();
        let scope = {
            let mut warn = |message| sink.warn(message);
            self.dir_scope(&vpath, &children, &mut warn)
        };
        for child in &children {
            self.walk_unit(child, scope.as_ref(), sink)?;
        }
        Ok(())
    }

    /// Expand an archive. `member_depth` is the containment depth of this
    /// archive's members. Unreadable archives and members are warnings, not
    /// failures; only sink errors propagate.
    fn walk_zip<R: Read + Seek>(
        &self,
        vpath: &str,
        reader: R,
        member_depth: u32,
        archive_modified: Option<DateTime<Utc>>,
        sink: &mut dyn EntrySink,
    ) -> Result<()> {
        let mut archive = match ZipArchive::new(reader) {
            Ok(archive) => archive,
            Err(err) => {
                sink.warn(format!("{vpath}: unreadable archive: {err}"));
                return Ok(());
            }
        };

        let members = {
            let mut warn = |message| sink.warn(message);
            collect_members(&mut archive, vpath, &mut warn)
        };
        let scope = match &self.sibling_target {
            Some(target) => {
                let mut warn = |message| sink.warn(message);
                Some(resolve_zip_scope(
                    vpath,
                    &mut archive,
                    &members,
                    target,
                    self.max_entry_bytes,
                    &mut warn,
                ))
            }
            None => None,
        };

        for (index, name) in &members {
            let member_vpath = format!("{vpath}/{name}");
            if is_zip_name(name) {
                let read = {
                    let mut warn = |message| sink.warn(message);
                    read_member(&mut archive, *index, &member_vpath, self.max_entry_bytes, &mut warn)
                };
                match read {
                    MemberRead::Bytes(bytes, modified) => {
                        sink.container(&member_vpath);
                        self.walk_zip(
                            &member_vpath,
                            Cursor::new(bytes),
                            member_depth + 1,
                            modified.or(archive_modified),
                            sink,
                        )?;
                    }
                    MemberRead::TooLarge(_) => sink.warn(format!(
                        "{member_vpath}: nested archive exceeds the in-memory size cap, skipped"
                    )),
                    MemberRead::Failed => {}
                }
                continue;
            }

            let entry = if self.content.wants(&member_vpath) {
                let read = {
                    let mut warn = |message| sink.warn(message);
                    read_member(&mut archive, *index, &member_vpath, self.max_entry_bytes, &mut warn)
                };
                match read {
                    MemberRead::Bytes(bytes, modified) => Entry::from_bytes(
                        member_vpath,
                        member_depth,
                        modified.or(archive_modified),
                        bytes,
                    ),
                    MemberRead::TooLarge(modified) => Entry::too_large(
                        member_vpath,
                        member_depth,
                        modified.or(archive_modified),
                    ),
                    MemberRead::Failed => continue,
                }
            } else {
                let modified = match archive.by_index(*index) {
                    Ok(member) => member.last_modified().and_then(zip_datetime),
                    Err(_) => None,
                };
                Entry::unread(member_vpath, member_depth, modified.or(archive_modified))
            };
            let entry = match &scope {
                Some(scope) => entry.with_scope(Arc::clone(scope)),
                None => entry,
            };
            sink.entry(entry)?;
        }
        Ok(())
    }

    /// Resolve the sibling document among a directory's children.
    fn dir_scope(
        &self,
        scope_path: &str,
        children: &[PathBuf],
        warn: &mut dyn FnMut(String),
    ) -> Option<Arc<ScopeDoc>> {
        let target = self.sibling_target.as_deref()?;
        Some(resolve_dir_scope(
            scope_path,
            children,
            target,
            self.max_entry_bytes,
            warn,
        ))
    }
}

/// Resolve the sibling document among a directory's children. One directory
/// is one scope; the target matches on exact file name.
pub(crate) fn resolve_dir_scope(
    scope_path: &str,
    children: &[PathBuf],
    target: &str,
    max_bytes: u64,
    warn: &mut dyn FnMut(String),
) -> Arc<ScopeDoc> {
    let candidates: Vec<&PathBuf> = children
        .iter()
        .filter(|child| {
            child.file_name() == Some(OsStr::new(target))
                && fs::symlink_metadata(child).is_ok_and(|meta| meta.is_file())
        })
        .collect();
    let resolution = match candidates.as_slice() {
        [] => ScopeResolution::Missing,
        [only] => {
            let candidate_path = virtual_path(only);
            match read_capped(only, max_bytes) {
                Ok(Some(bytes)) => ScopeResolution::Found {
                    path: candidate_path,
                    bytes,
                },
                Ok(None) => {
                    warn(format!(
                        "{candidate_path}: target document exceeds the in-memory size cap"
                    ));
                    ScopeResolution::TooLarge
                }
                Err(err) => {
                    warn(format!("{candidate_path}: {err}"));
                    ScopeResolution::Missing
                }
            }
        }
        many => ScopeResolution::Ambiguous(many.iter().map(|p| virtual_path(p)).collect()),
    };
    Arc::new(ScopeDoc {
        scope: scope_path.to_string(),
        resolution,
    })
}

/// Non-directory archive members as `(index, name)`, sorted by name so the
/// sequence is stable across runs.
pub(crate) fn collect_members<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    vpath: &str,
    warn: &mut dyn FnMut(String),
) -> Vec<(usize, String)> {
    let mut members = Vec::new();
    for index in 0..archive.len() {
        match archive.by_index(index) {
            Ok(member) => {
                if !member.is_dir() {
                    members.push((index, member.name().to_string()));
                }
            }
            Err(err) => warn(format!("{vpath}: member #{index}: {err}")),
        }
    }
    members.sort_by(|a, b| a.1.cmp(&b.1));
    members
}

/// Resolve the sibling document among an archive's members. The whole
/// archive is one scope; the target matches on final path segment.
pub(crate) fn resolve_zip_scope<R: Read + Seek>(
    scope_path: &str,
    archive: &mut ZipArchive<R>,
    members: &[(usize, String)],
    target: &str,
    max_bytes: u64,
    warn: &mut dyn FnMut(String),
) -> Arc<ScopeDoc> {
    let candidates: Vec<&(usize, String)> = members
        .iter()
        .filter(|(_, name)| name.rsplit('/').next() == Some(target))
        .collect();
    let resolution = match candidates.as_slice() {
        [] => ScopeResolution::Missing,
        [(index, name)] => {
            let candidate_path = format!("{scope_path}/{name}");
            match read_member(archive, *index, &candidate_path, max_bytes, warn) {
                MemberRead::Bytes(bytes, _) => ScopeResolution::Found {
                    path: candidate_path,
                    bytes,
                },
                MemberRead::TooLarge(_) => {
                    warn(format!(
                        "{candidate_path}: target document exceeds the in-memory size cap"
                    ));
                    ScopeResolution::TooLarge
                }
                MemberRead::Failed => ScopeResolution::Missing,
            }
        }
        many => ScopeResolution::Ambiguous(
            many.iter()
                .map(|(_, name)| format!("{scope_path}/{name}"))
                .collect(),
        ),
    };
    Arc::new(ScopeDoc {
        scope: scope_path.to_string(),
        resolution,
    })
}

/// Outcome of reading one member under the size cap.
enum MemberRead {
    Bytes(Vec<u8>, Option<DateTime<Utc>>),
    TooLarge(Option<DateTime<Utc>>),
    /// Already warned.
    Failed,
}

/// Read one member fully, bounded by `max_bytes`. Read failures are warned
/// here; the cap outcome is left to the caller.
fn read_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    member_vpath: &str,
    max_bytes: u64,
    warn: &mut dyn FnMut(String),
) -> MemberRead {
    let mut member = match archive.by_index(index) {
        Ok(member) => member,
        Err(err) => {
            warn(format!("{member_vpath}: {err}"));
            return MemberRead::Failed;
        }
    };
    let modified = member.last_modified().and_then(zip_datetime);
    let mut bytes = Vec::new();
    if let Err(err) = (&mut member).take(max_bytes + 1).read_to_end(&mut bytes) {
        warn(format!("{member_vpath}: {err}"));
        return MemberRead::Failed;
    }
    if bytes.len() as u64 > max_bytes {
        return MemberRead::TooLarge(modified);
    }
    MemberRead::Bytes(bytes, modified)
}

pub(crate) fn is_zip_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".zip")
}

pub(crate) fn virtual_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn modified_time(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

/// Zip stores DOS timestamps; out-of-range values are treated as absent.
pub(crate) fn zip_datetime(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        dt.year() as i32,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
    .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_names_are_case_insensitive() {
        assert!(is_zip_name("logs/archive.ZIP"));
        assert!(is_zip_name("a.zip"));
        assert!(!is_zip_name("a.zip.txt"));
        assert!(!is_zip_name("azip"));
    }

    #[test]
    fn dos_timestamps_convert() {
        let dt = zip::DateTime::from_date_and_time(2024, 3, 9, 12, 30, 0).expect("valid");
        let converted = zip_datetime(dt).expect("in range");
        assert_eq!(converted.to_rfc3339(), "2024-03-09T12:30:00+00:00");
    }
}
