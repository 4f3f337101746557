//! Filesystem operations module.
//!
//! This module provides the filesystem side of the pipeline:
//! - Enumerating a tree into FileRecords (total-effort, never fail-fast)
//! - Copying a tree into a destination parent with chunked streaming
//! - Relocating a file or directory (rename, or copy then remove)

use crate::error::{EngineError, Result};
use crate::model::{is_operational_artifact, FileRecord, RunContext};
use crate::progress::{ProgressCallback, Stage, StageTracker};
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Outcome of a tree copy.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    /// `destination_parent/<source top folder name>`
    pub destination_root: PathBuf,

    /// Relative paths that were fully written, in copy order.
    pub copied: Vec<String>,

    /// Relative paths that failed, with the error message.
    pub failed: Vec<(String, String)>,

    pub bytes_copied: u64,
}

/// How [`relocate`] moved an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// Atomic rename on the same filesystem.
    Moved,
    /// Rename failed (e.g. cross-device); copied and then removed the original.
    CopiedThenRemoved,
}

/// Fail unless `path` is an existing directory.
pub fn check_directory(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::NotADirectory {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EngineError::PathNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(EngineError::io(path, e)),
    }
}

/// Render a path relative to its root with `/` separators.
///
/// The rendering is injective: a backslash in a name is written `\\` and a
/// byte that is not part of valid UTF-8 is written `\xNN`, so two distinct
/// names never share a key.
pub fn to_relative_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(component_key(part)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn component_key(part: &OsStr) -> String {
    let bytes = os_bytes(part);
    let mut rest: &[u8] = &bytes;
    let mut key = String::with_capacity(rest.len());
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_escaped(&mut key, valid);
                return key;
            }
            Err(e) => {
                let (valid, invalid) = rest.split_at(e.valid_up_to());
                push_escaped(&mut key, std::str::from_utf8(valid).unwrap_or_default());
                let bad = e.error_len().unwrap_or(invalid.len());
                for b in &invalid[..bad] {
                    key.push_str(&format!("\\x{:02x}", b));
                }
                rest = &invalid[bad..];
            }
        }
    }
}

fn push_escaped(key: &mut String, text: &str) {
    for c in text.chars() {
        if c == '\\' {
            key.push_str("\\\\");
        } else {
            key.push(c);
        }
    }
}

#[cfg(unix)]
fn os_bytes(part: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    part.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(part: &OsStr) -> Vec<u8> {
    part.to_string_lossy().into_owned().into_bytes()
}

/// Name of the top folder of `source`, used as the package name.
pub fn package_name(source: &Path) -> Result<String> {
    let resolved = source
        .canonicalize()
        .map_err(|e| EngineError::io(source, e))?;
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::InvalidPath {
            path: source.to_path_buf(),
            reason: "source has no top folder name".to_string(),
        })
}

/// Enumerate every regular file under `root`.
///
/// Entries whose file name matches `exclude` are skipped; an excluded
/// directory is skipped with its whole subtree. Symlinks, entries that cannot
/// be stat'ed and unreadable directories are reported with `size: None`
/// instead of aborting. Results are sorted by relative path.
///
/// # Errors
/// Only if `root` itself is missing or not a directory.
pub fn enumerate(root: &Path, exclude: &dyn Fn(&str) -> bool) -> Result<Vec<FileRecord>> {
    check_directory(root)?;

    let mut records = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !exclude(&e.file_name().to_string_lossy()));

    for entry in walker {
        match entry {
            Ok(entry) => {
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    continue;
                }
                let native = relative_to(root, entry.path());
                let size = if file_type.is_symlink() {
                    tracing::debug!(path = %native.display(), "symlink recorded without size");
                    None
                } else {
                    match entry.metadata() {
                        Ok(metadata) => Some(metadata.len()),
                        Err(e) => {
                            tracing::warn!(
                                path = %native.display(),
                                error = %e,
                                "cannot stat file"
                            );
                            None
                        }
                    }
                };
                records.push(FileRecord::from_native(native, size));
            }
            Err(e) => {
                let native = e.path().map(|p| relative_to(root, p)).unwrap_or_default();
                tracing::warn!(
                    path = %native.display(),
                    error = %e,
                    "unreadable entry during enumeration"
                );
                if !native.as_os_str().is_empty() {
                    records.push(FileRecord::from_native(native, None));
                }
            }
        }
    }

    records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    records.dedup_by(|a, b| a.native_path == b.native_path);
    Ok(records)
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Copy the source top folder into `destination_parent`.
///
/// Creates `destination_parent/<top name>` and streams every non-artifact
/// file across in `chunk_size` pieces. A file that fails is logged, its
/// partial output removed, and the copy moves on.
///
/// # Errors
/// - `PathNotFound` / `NotADirectory` for a bad source or destination parent
/// - `DestinationExists` if the destination root exists and `allow_overwrite`
///   is false; nothing is written in that case
/// - `Io` if the destination root cannot be created
pub fn copy_tree(
    source: &Path,
    destination_parent: &Path,
    allow_overwrite: bool,
    ctx: &RunContext,
    progress: &dyn ProgressCallback,
) -> Result<CopyOutcome> {
    let destination_root = plan_destination(source, destination_parent, allow_overwrite)?;
    let config = &ctx.config;

    create_dirs(&destination_root, destination_parent, config.dir_mode)?;

    let files = enumerate(source, &is_operational_artifact)?;
    tracing::info!(
        files = files.len(),
        destination = %destination_root.display(),
        "copying tree"
    );

    let mut outcome = CopyOutcome {
        destination_root: destination_root.clone(),
        copied: Vec::with_capacity(files.len()),
        failed: Vec::new(),
        bytes_copied: 0,
    };
    let mut buffer = vec![0u8; config.chunk_size];
    let mut tracker = StageTracker::start(
        Stage::Copy,
        files.len(),
        config.copy_progress_interval,
        progress,
    );

    for record in &files {
        let src = source.join(&record.native_path);
        let dst = destination_root.join(&record.native_path);

        let result = match dst.parent() {
            Some(parent) => create_dirs(parent, &destination_root, config.dir_mode)
                .map_err(|e| match e {
                    EngineError::Io { source, .. } => EngineError::Copy {
                        from: src.clone(),
                        to: dst.clone(),
                        source,
                    },
                    other => other,
                })
                .and_then(|()| copy_file_chunked(&src, &dst, &mut buffer, config.file_mode)),
            None => copy_file_chunked(&src, &dst, &mut buffer, config.file_mode),
        };

        match result {
            Ok(bytes) => {
                tracing::debug!(path = %record.relative_path, bytes, "copied");
                outcome.bytes_copied += bytes;
                outcome.copied.push(record.relative_path.clone());
            }
            Err(e) => {
                tracing::warn!(path = %record.relative_path, error = %e, "copy failed; continuing");
                outcome.failed.push((record.relative_path.clone(), e.to_string()));
            }
        }
        tracker.advance(&record.relative_path);
    }
    tracker.finish();

    Ok(outcome)
}

/// Validate the copy parameters and return the destination root.
///
/// Performs no writes.
pub fn plan_destination(
    source: &Path,
    destination_parent: &Path,
    allow_overwrite: bool,
) -> Result<PathBuf> {
    check_directory(source)?;
    check_directory(destination_parent)?;

    let top_name = package_name(source)?;
    let destination_root = destination_parent.join(&top_name);

    let resolved_source = source.canonicalize().map_err(|e| EngineError::io(source, e))?;
    let resolved_parent = destination_parent
        .canonicalize()
        .map_err(|e| EngineError::io(destination_parent, e))?;
    if resolved_parent.join(&top_name).starts_with(&resolved_source) {
        return Err(EngineError::InvalidPath {
            path: destination_root,
            reason: "destination lies inside the source tree".to_string(),
        });
    }

    match fs::symlink_metadata(&destination_root) {
        Ok(metadata) if !metadata.is_dir() => Err(EngineError::NotADirectory {
            path: destination_root,
        }),
        Ok(_) if !allow_overwrite => Err(EngineError::DestinationExists {
            path: destination_root,
        }),
        Ok(_) => {
            tracing::warn!(
                destination = %destination_root.display(),
                "destination exists; overwriting files with identical relative paths"
            );
            Ok(destination_root)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(destination_root),
        Err(e) => Err(EngineError::io(&destination_root, e)),
    }
}

/// Stream `src` into `dst` through `buffer`, then apply `file_mode` and the
/// source modification time. Returns the number of bytes written.
pub fn copy_file_chunked(src: &Path, dst: &Path, buffer: &mut [u8], file_mode: u32) -> Result<u64> {
    let copy_err = |e: io::Error| EngineError::Copy {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    // A stale file from an earlier copy must not survive a failed one
    let discard = |e: io::Error| {
        let _ = fs::remove_file(dst);
        copy_err(e)
    };

    let mut reader = fs::File::open(src).map_err(discard)?;
    let src_mtime = reader.metadata().and_then(|m| m.modified()).ok();
    let mut writer = fs::File::create(dst).map_err(discard)?;

    let streamed = stream(&mut reader, &mut writer, buffer);
    drop(writer);
    let total = match streamed {
        Ok(total) => total,
        Err(e) => return Err(discard(e)),
    };

    set_mode(dst, file_mode);
    if let Some(mtime) = src_mtime {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            tracing::debug!(path = %dst.display(), error = %e, "could not preserve mtime");
        }
    }

    Ok(total)
}

fn stream(reader: &mut impl Read, writer: &mut impl Write, buffer: &mut [u8]) -> io::Result<u64> {
    let mut total = 0u64;
    loop {
        let n = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Create `dir` and any missing ancestors below `stop_at`, applying `dir_mode`
/// to each directory this call creates.
fn create_dirs(dir: &Path, stop_at: &Path, dir_mode: u32) -> Result<()> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|p| *p != stop_at && !p.exists())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;
    for created in missing.iter().rev() {
        set_mode(created, dir_mode);
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        tracing::debug!(path = %path.display(), error = %e, "could not set permissions");
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

/// Move a file or directory into `dest_dir`.
///
/// Tries an atomic rename first. If that fails (typically because `dest_dir`
/// is on another filesystem) the entry is copied and the original removed.
///
/// # Errors
/// - `PathNotFound` if `path` does not exist
/// - `DestinationExists` if `dest_dir` already holds an entry with that name
/// - `Io` if the fallback copy or the removal fails
pub fn relocate(path: &Path, dest_dir: &Path) -> Result<Relocation> {
    let target = relocation_target(path, dest_dir)?;
    match fs::rename(path, &target) {
        Ok(()) => {
            tracing::info!(from = %path.display(), to = %target.display(), "moved");
            Ok(Relocation::Moved)
        }
        Err(e) => {
            tracing::warn!(
                from = %path.display(),
                to = %target.display(),
                error = %e,
                "rename failed; falling back to copy and remove"
            );
            copy_then_remove(path, &target)?;
            Ok(Relocation::CopiedThenRemoved)
        }
    }
}

fn relocation_target(path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    if fs::symlink_metadata(path).is_err() {
        return Err(EngineError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    let name = path.file_name().ok_or_else(|| EngineError::InvalidPath {
        path: path.to_path_buf(),
        reason: "nothing to relocate".to_string(),
    })?;
    fs::create_dir_all(dest_dir).map_err(|e| EngineError::io(dest_dir, e))?;
    let target = dest_dir.join(name);
    if fs::symlink_metadata(&target).is_ok() {
        return Err(EngineError::DestinationExists { path: target });
    }
    Ok(target)
}

/// Fallback half of [`relocate`]: copy `path` to `target`, then remove `path`.
pub(crate) fn copy_then_remove(path: &Path, target: &Path) -> Result<()> {
    let is_dir = path.is_dir();
    let copied = if is_dir {
        copy_dir_into(path, target)
    } else {
        fs::copy(path, target)
            .map(|_| ())
            .map_err(|e| EngineError::io(target, e))
    };
    if let Err(e) = copied {
        // The source is untouched; drop the partial target
        let _ = if is_dir {
            fs::remove_dir_all(target)
        } else {
            fs::remove_file(target)
        };
        return Err(e);
    }
    if is_dir {
        fs::remove_dir_all(path).map_err(|e| EngineError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| EngineError::io(path, e))
    }
}

fn copy_dir_into(path: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            EngineError::io(at, e.into())
        })?;
        let dst = target.join(entry.path().strip_prefix(path).unwrap_or(entry.path()));
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dst).map_err(|e| EngineError::io(&dst, e))?;
        } else {
            fs::copy(entry.path(), &dst).map_err(|e| EngineError::io(&dst, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::progress::LogProgress;

    fn write_file(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, content).expect("Failed to write file");
    }

    fn test_ctx() -> RunContext {
        let config = PipelineConfig {
            chunk_size: 4,
            ..PipelineConfig::default()
        };
        RunContext::new("tester", config)
    }

    #[test]
    fn test_enumerate_nested_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("b.txt"), b"data2");
        write_file(&src.join("a/file1.txt"), b"data1");
        write_file(&src.join("a/deep/file2.txt"), b"hello world");

        let records = enumerate(&src, &|_| false).expect("Failed to enumerate");

        let paths: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a/deep/file2.txt", "a/file1.txt", "b.txt"]);
        let total: u64 = records.iter().filter_map(|r| r.size).sum();
        assert_eq!(total, 21);
    }

    #[test]
    fn test_enumerate_applies_exclusion() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("keep.txt"), b"keep");
        write_file(&src.join("source_20240101_120000.txt"), b"ledger");
        write_file(&src.join("sub/manifest_20240101_120000.json"), b"{}");

        let records = enumerate(&src, &is_operational_artifact).expect("Failed to enumerate");

        let paths: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn test_enumerate_nonexistent_root() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = enumerate(&temp_dir.path().join("nonexistent"), &|_| false);
        assert!(matches!(result, Err(EngineError::PathNotFound { .. })));
    }

    #[test]
    fn test_enumerate_file_as_root() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("file.txt");
        write_file(&file, b"x");
        let result = enumerate(&file, &|_| false);
        assert!(matches!(result, Err(EngineError::NotADirectory { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_symlink_has_unknown_size() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("real.txt"), b"real");
        std::os::unix::fs::symlink(src.join("real.txt"), src.join("link.txt"))
            .expect("Failed to create symlink");

        let records = enumerate(&src, &|_| false).expect("Failed to enumerate");

        let link = records
            .iter()
            .find(|r| r.relative_path == "link.txt")
            .expect("symlink should be listed");
        assert_eq!(link.size, None);
        let real = records
            .iter()
            .find(|r| r.relative_path == "real.txt")
            .expect("file should be listed");
        assert_eq!(real.size, Some(4));
    }

    #[test]
    fn test_relative_path_helpers() {
        let rel = to_relative_string(Path::new("a").join("b").join("c.txt").as_path());
        assert_eq!(rel, "a/b/c.txt");
        assert_eq!(to_relative_string(Path::new("plain.txt")), "plain.txt");
    }

    #[cfg(unix)]
    #[test]
    fn test_keys_distinguish_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join(OsStr::from_bytes(b"caf\xe9.txt")), b"latin1");
        write_file(&src.join("caf\\xe9.txt"), b"literal");
        write_file(&src.join("back\\slash.txt"), b"slash");

        let records = enumerate(&src, &|_| false).expect("Failed to enumerate");

        let keys: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(keys, vec!["back\\\\slash.txt", "caf\\\\xe9.txt", "caf\\xe9.txt"]);
        let latin1 = records
            .iter()
            .find(|r| r.relative_path == "caf\\xe9.txt")
            .expect("non-UTF-8 record");
        assert_eq!(latin1.native_path.as_os_str().as_bytes(), b"caf\xe9.txt");
        assert_eq!(latin1.size, Some(6));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_non_utf8_name() {
        use std::os::unix::ffi::OsStrExt;
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        write_file(&src.join(name), b"latin1");
        let parent = temp_dir.path().join("out");
        fs::create_dir(&parent).expect("Failed to create dir");

        let outcome = copy_tree(&src, &parent, false, &test_ctx(), &LogProgress)
            .expect("Failed to copy tree");

        assert_eq!(outcome.copied, vec!["caf\\xe9.txt"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(fs::read(parent.join("src").join(name)).expect("read"), b"latin1");
    }

    #[test]
    fn test_copy_file_chunked_small_buffer() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("dest.txt");
        write_file(&src, b"test content spanning several chunks");

        let mut buffer = [0u8; 3];
        let bytes = copy_file_chunked(&src, &dst, &mut buffer, 0o644).expect("Failed to copy");

        assert_eq!(bytes, 36);
        let content = fs::read(&dst).expect("Failed to read dest");
        assert_eq!(content, b"test content spanning several chunks");
    }

    #[test]
    fn test_copy_file_failure_removes_stale_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dest.txt");
        write_file(&dst, b"from an earlier run");

        let mut buffer = [0u8; 8];
        let result = copy_file_chunked(&temp_dir.path().join("gone.txt"), &dst, &mut buffer, 0o644);

        assert!(matches!(result, Err(EngineError::Copy { .. })));
        assert!(!dst.exists(), "stale destination should be removed");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("dest.txt");
        write_file(&src, b"x");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o600)).expect("chmod");

        let mut buffer = [0u8; 16];
        copy_file_chunked(&src, &dst, &mut buffer, 0o644).expect("Failed to copy");

        let mode = fs::metadata(&dst).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_copy_tree_includes_top_folder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("collection");
        write_file(&src.join("one.txt"), b"one");
        write_file(&src.join("nested/two.txt"), b"two two");
        let parent = temp_dir.path().join("dst");
        fs::create_dir(&parent).expect("Failed to create dst dir");

        let outcome = copy_tree(&src, &parent, false, &test_ctx(), &LogProgress)
            .expect("Failed to copy tree");

        assert_eq!(outcome.destination_root, parent.join("collection"));
        assert_eq!(outcome.copied, vec!["nested/two.txt", "one.txt"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.bytes_copied, 10);
        let content = fs::read_to_string(parent.join("collection/nested/two.txt"))
            .expect("Failed to read copied file");
        assert_eq!(content, "two two");
    }

    #[test]
    fn test_copy_tree_excludes_source_ledger() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("pkg");
        write_file(&src.join("payload.bin"), b"payload");
        write_file(&src.join("source_20240101_120000.txt"), b"abc  *payload.bin\n");
        let parent = temp_dir.path().join("dst");
        fs::create_dir(&parent).expect("Failed to create dst dir");

        let outcome = copy_tree(&src, &parent, false, &test_ctx(), &LogProgress)
            .expect("Failed to copy tree");

        assert_eq!(outcome.copied, vec!["payload.bin"]);
        assert!(!parent.join("pkg/source_20240101_120000.txt").exists());
    }

    #[test]
    fn test_copy_tree_refuses_existing_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("pkg");
        write_file(&src.join("new.txt"), b"new");
        let parent = temp_dir.path().join("dst");
        write_file(&parent.join("pkg/old.txt"), b"old");

        let result = copy_tree(&src, &parent, false, &test_ctx(), &LogProgress);

        assert!(matches!(result, Err(EngineError::DestinationExists { .. })));
        let entries: Vec<_> = fs::read_dir(parent.join("pkg"))
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries.len(), 1, "no files may be written without consent");
        assert!(!parent.join("pkg/new.txt").exists());
    }

    #[test]
    fn test_copy_tree_overwrites_with_consent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("pkg");
        write_file(&src.join("a.txt"), b"fresh");
        let parent = temp_dir.path().join("dst");
        write_file(&parent.join("pkg/a.txt"), b"stale content");

        let outcome = copy_tree(&src, &parent, true, &test_ctx(), &LogProgress)
            .expect("Failed to copy tree");

        assert_eq!(outcome.copied, vec!["a.txt"]);
        let content = fs::read_to_string(parent.join("pkg/a.txt")).expect("read");
        assert_eq!(content, "fresh");
    }

    #[test]
    fn test_copy_tree_missing_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("pkg");
        write_file(&src.join("a.txt"), b"a");

        let result = copy_tree(
            &src,
            &temp_dir.path().join("nope"),
            false,
            &test_ctx(),
            &LogProgress,
        );
        assert!(matches!(result, Err(EngineError::PathNotFound { .. })));
    }

    #[test]
    fn test_copy_tree_rejects_destination_inside_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("pkg");
        write_file(&src.join("a.txt"), b"a");

        let result = copy_tree(&src, &src, false, &test_ctx(), &LogProgress);
        assert!(matches!(result, Err(EngineError::InvalidPath { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_skips_unreadable_file() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("pkg");
        write_file(&src.join("ok.txt"), b"ok");
        write_file(&src.join("locked.txt"), b"secret");
        fs::set_permissions(src.join("locked.txt"), fs::Permissions::from_mode(0o000))
            .expect("chmod");
        if fs::File::open(src.join("locked.txt")).is_ok() {
            // Running with privileges that ignore permission bits
            return;
        }
        let parent = temp_dir.path().join("dst");
        fs::create_dir(&parent).expect("Failed to create dst dir");

        let outcome = copy_tree(&src, &parent, false, &test_ctx(), &LogProgress)
            .expect("copy should continue past a bad file");

        assert_eq!(outcome.copied, vec!["ok.txt"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "locked.txt");
        assert!(!parent.join("pkg/locked.txt").exists());
    }

    #[test]
    fn test_relocate_file_moves() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("report.pdf");
        write_file(&file, b"pdf");
        let target_dir = temp_dir.path().join("objects");

        let how = relocate(&file, &target_dir).expect("Failed to relocate");

        assert_eq!(how, Relocation::Moved);
        assert!(!file.exists());
        assert_eq!(fs::read(target_dir.join("report.pdf")).expect("read"), b"pdf");
    }

    #[test]
    fn test_relocate_refuses_existing_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("a.txt");
        write_file(&file, b"new");
        write_file(&temp_dir.path().join("objects/a.txt"), b"old");

        let result = relocate(&file, &temp_dir.path().join("objects"));

        assert!(matches!(result, Err(EngineError::DestinationExists { .. })));
        assert!(file.exists());
    }

    #[test]
    fn test_relocate_missing_path() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = relocate(&temp_dir.path().join("ghost"), temp_dir.path());
        assert!(matches!(result, Err(EngineError::PathNotFound { .. })));
    }

    #[test]
    fn test_copy_then_remove_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("bundle");
        write_file(&dir.join("x.txt"), b"x");
        write_file(&dir.join("inner/y.txt"), b"y");
        let target = temp_dir.path().join("elsewhere").join("bundle");
        fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");

        copy_then_remove(&dir, &target).expect("Failed to copy and remove");

        assert!(!dir.exists());
        assert_eq!(fs::read(target.join("x.txt")).expect("read"), b"x");
        assert_eq!(fs::read(target.join("inner/y.txt")).expect("read"), b"y");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_then_remove_failure_drops_partial_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("bundle");
        write_file(&dir.join("ok.txt"), b"ok");
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), dir.join("dangling"))
            .expect("Failed to create symlink");
        let target = temp_dir.path().join("elsewhere").join("bundle");
        fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");

        let result = copy_then_remove(&dir, &target);

        assert!(result.is_err());
        assert!(!target.exists(), "partial target should be removed");
        assert_eq!(fs::read(dir.join("ok.txt")).expect("read"), b"ok");
    }
}
