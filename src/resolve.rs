use crate::entry::{Entry, ScopeDoc};
use crate::walker::{
    collect_members, is_zip_name, modified_time, resolve_dir_scope, resolve_zip_scope,
    zip_datetime,
};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::PathBuf;
use std::sync::Arc;
use zip::ZipArchive;
use zip::result::ZipError;

/// Re-resolves identifiers emitted by a previous run back into entries,
/// without walking the whole tree again.
pub struct Resolver {
    /// Whether the active selector or output mode reads content.
    pub want_content: bool,
    pub max_entry_bytes: u64,
    /// Sibling document name resolved in the entry's container scope.
    pub sibling_target: Option<String>,
}

impl Resolver {
    /// Resolve one identifier. The physical prefix of the virtual path is
    /// located on the filesystem, then the remainder is resolved through
    /// the archive chain.
    pub fn resolve(&self, id: &str, warn: &mut dyn FnMut(String)) -> Result<Entry> {
        let (physical, remainder) = split_physical(id)?;
        let meta = fs::symlink_metadata(&physical)?;
        let modified = modified_time(&meta);

        if remainder.is_empty() {
            let mut entry = if self.want_content {
                Entry::lazy_file(id.to_string(), physical.clone(), modified)
            } else {
                Entry::unread(id.to_string(), 0, modified)
            };
            if let Some(target) = &self.sibling_target {
                entry = entry.with_scope(self.dir_scope(&physical, target, warn)?);
            }
            return Ok(entry);
        }

        let prefix = physical.to_string_lossy().into_owned();
        let file = fs::File::open(&physical)
            .with_context(|| format!("cannot open archive {prefix}"))?;
        self.resolve_in_archive(&prefix, file, 1, modified, &remainder, warn)
    }

    fn resolve_in_archive<R: Read + Seek>(
        &self,
        archive_vpath: &str,
        reader: R,
        depth: u32,
        archive_modified: Option<DateTime<Utc>>,
        remainder: &str,
        warn: &mut dyn FnMut(String),
    ) -> Result<Entry> {
        let mut archive = ZipArchive::new(reader)
            .with_context(|| format!("unreadable archive {archive_vpath}"))?;

        let direct = match archive.by_name(remainder) {
            Ok(mut member) => {
                let vpath = format!("{archive_vpath}/{remainder}");
                let modified = member.last_modified().and_then(zip_datetime).or(archive_modified);
                let entry = if self.want_content {
                    let mut bytes = Vec::new();
                    (&mut member)
                        .take(self.max_entry_bytes + 1)
                        .read_to_end(&mut bytes)
                        .with_context(|| format!("failed to read {vpath}"))?;
                    if bytes.len() as u64 > self.max_entry_bytes {
                        Entry::too_large(vpath, depth, modified)
                    } else {
                        Entry::from_bytes(vpath, depth, modified, bytes)
                    }
                } else {
                    Entry::unread(vpath, depth, modified)
                };
                Some(entry)
            }
            Err(ZipError::FileNotFound) => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(mut entry) = direct {
            if let Some(target) = &self.sibling_target {
                let members = collect_members(&mut archive, archive_vpath, warn);
                entry = entry.with_scope(resolve_zip_scope(
                    archive_vpath,
                    &mut archive,
                    &members,
                    target,
                    self.max_entry_bytes,
                    warn,
                ));
            }
            return Ok(entry);
        }

        // Not a direct member; descend through the nested archive whose
        // name prefixes the remainder.
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        for name in names {
            if !is_zip_name(&name) {
                continue;
            }
            let Some(rest) = remainder
                .strip_prefix(name.as_str())
                .and_then(|r| r.strip_prefix('/'))
            else {
                continue;
            };
            let mut member = archive
                .by_name(&name)
                .with_context(|| format!("{archive_vpath}/{name}"))?;
            let modified = member.last_modified().and_then(zip_datetime).or(archive_modified);
            let mut bytes = Vec::new();
            (&mut member)
                .take(self.max_entry_bytes + 1)
                .read_to_end(&mut bytes)
                .with_context(|| format!("failed to read {archive_vpath}/{name}"))?;
            if bytes.len() as u64 > self.max_entry_bytes {
                bail!("nested archive {archive_vpath}/{name} exceeds the in-memory size cap");
            }
            drop(member);
            let child_vpath = format!("{archive_vpath}/{name}");
            return self.resolve_in_archive(&child_vpath, Cursor::new(bytes), depth + 1, modified, rest, warn);
        }

        bail!("no member {remainder} in {archive_vpath}")
    }

    /// Scope of a plain-file identifier: its parent directory.
    fn dir_scope(
        &self,
        physical: &PathBuf,
        target: &str,
        warn: &mut dyn FnMut(String),
    ) -> Result<Arc<ScopeDoc>> {
        let parent = physical
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let mut children = Vec::new();
        for child in fs::read_dir(parent)
            .with_context(|| format!("cannot read directory {}", parent.display()))?
        {
            children.push(child?.path());
        }
        children.sort();
        Ok(resolve_dir_scope(
            &parent.to_string_lossy(),
            &children,
            target,
            self.max_entry_bytes,
            warn,
        ))
    }
}

/// Split a virtual path into its longest existing physical file prefix and
/// the in-archive remainder.
fn split_physical(id: &str) -> Result<(PathBuf, String)> {
    let mut boundary = 0usize;
    while boundary <= id.len() {
        let next = id[boundary..]
            .find('/')
            .map(|i| boundary + i)
            .unwrap_or(id.len());
        let prefix = if next == 0 { "/" } else { &id[..next] };
        match fs::symlink_metadata(prefix) {
            Ok(meta) if meta.is_file() => {
                let remainder = id.get(next + 1..).unwrap_or("").to_string();
                return Ok((PathBuf::from(prefix), remainder));
            }
            Ok(_) => {}
            Err(err) => bail!("cannot resolve {id}: {err}"),
        }
        boundary = next + 1;
    }
    bail!("cannot resolve {id}: not a file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn split_finds_plain_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("a.log");
        fs::write(&file, "x").expect("write");

        let id = file.to_string_lossy().into_owned();
        let (physical, remainder) = split_physical(&id).expect("resolves");
        assert_eq!(physical, file);
        assert_eq!(remainder, "");
    }

    #[test]
    fn split_stops_at_archive_boundary() {
        let dir = tempfile::tempdir().expect("temp dir");
        let archive = dir.path().join("run.zip");
        let mut file = fs::File::create(&archive).expect("create");
        file.write_all(b"not really a zip").expect("write");

        let id = format!("{}/inner/app.log", archive.to_string_lossy());
        let (physical, remainder) = split_physical(&id).expect("resolves");
        assert_eq!(physical, archive);
        assert_eq!(remainder, "inner/app.log");
    }

    #[test]
    fn split_rejects_missing_paths() {
        assert!(split_physical("/definitely/not/here.log").is_err());
    }
}
